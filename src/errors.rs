// canstim/src/errors.rs
//
// Construction and validation errors for the CAN frame model.

//! Errors reported when building frame-model objects from invalid inputs.
//!
//! Only genuinely recoverable validation failures live here (a caller handed
//! us a data length that no DLC encodes, an identifier that does not fit the
//! selected format, a contradictory bit-timing configuration). Misuse of an
//! already-built frame (indexing a bit that does not exist, splicing an
//! error frame at the start of frame) is a programmer error and panics
//! instead, aborting the single test that tripped it.

use thiserror::Error;

/// Error returned when constructing or reconfiguring a frame-model object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// The identifier value does not fit the selected identifier format
    /// (11 bits for base, 29 bits for extended).
    #[error("identifier 0x{0:X} does not fit the selected identifier format")]
    IdentTooLarge(u32),
    /// DLC above the 4-bit range.
    #[error("DLC {0} out of range (maximum is 15)")]
    DlcOutOfRange(u8),
    /// The data length is not produced by any DLC.
    #[error("{0} is not a valid CAN data length")]
    InvalidDataLength(usize),
    /// A classical frame cannot carry more than 8 data bytes.
    #[error("classical frames carry at most 8 data bytes, requested {0}")]
    TooMuchData(usize),
    /// A bit-timing configuration violates a structural constraint.
    #[error("contradictory bit timing: {0}")]
    InvalidBitTiming(&'static str),
}
