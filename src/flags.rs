// canstim/src/flags.rs
//
// Frame-shape flags and their constrained randomisation.

//! Frame-shape flags of a CAN frame (FDF, IDE, RTR, BRS, ESI) and the bus
//! line value vocabulary.
//!
//! [`FrameFlags`] bundles the five flags together with a per-flag "randomise
//! this one" mark. A flag fixed through a constructor or setter keeps its
//! value; every flag left unspecified is sampled by [`FrameFlags::randomize`]
//! under the protocol constraints (no RTR CAN FD frames, no bit-rate shift
//! or error-passive marker on classical frames). Contradictory combinations
//! handed in explicitly are repaired on the spot and reported through the
//! `log` facade.

use log::warn;
use rand::Rng;
use std::fmt;

/// Value of a single bit on the bus.
///
/// Dominant wins over recessive when two nodes drive the bus at once, which
/// is what CAN arbitration and error signalling are built on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitValue {
    /// Logic 0, actively driven.
    Dominant = 0,
    /// Logic 1, the idle level.
    Recessive = 1,
}

impl BitValue {
    /// The other line value.
    pub fn opposite(self) -> Self {
        match self {
            BitValue::Dominant => BitValue::Recessive,
            BitValue::Recessive => BitValue::Dominant,
        }
    }

    /// Maps the least significant bit of `bits` to a line value.
    ///
    /// Handy when shifting multi-bit fields (identifier, DLC, data bytes)
    /// onto the bus most-significant-bit first.
    pub fn from_lsb(bits: u32) -> Self {
        if bits & 0x1 == 0 {
            BitValue::Dominant
        } else {
            BitValue::Recessive
        }
    }

    /// Whether this is the dominant level.
    pub fn is_dominant(self) -> bool {
        self == BitValue::Dominant
    }

    /// Whether this is the recessive level.
    pub fn is_recessive(self) -> bool {
        self == BitValue::Recessive
    }
}

impl fmt::Display for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Frame format: classical CAN or CAN FD.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Classical CAN 2.0 frame.
    Can20,
    /// CAN FD frame (EDL bit recessive).
    CanFd,
}

/// Identifier format: 11-bit base or 29-bit extended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IdentKind {
    /// 11-bit base identifier.
    Base,
    /// 29-bit extended identifier.
    Extended,
}

/// Remote transmission request flag.
///
/// Only meaningful for classical frames; CAN FD has no remote frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RtrFlag {
    /// Regular data frame.
    DataFrame,
    /// Remote frame, carries no data.
    RtrFrame,
}

/// Bit-rate switch flag of CAN FD frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BrsFlag {
    /// Switch to the data bit rate after the BRS sample point.
    Shift,
    /// Stay at the nominal bit rate for the whole frame.
    DontShift,
}

/// Error state indicator flag of CAN FD frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EsiFlag {
    /// Transmitter is error active (ESI dominant).
    ErrorActive,
    /// Transmitter is error passive (ESI recessive).
    ErrorPassive,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FrameKind::Can20 => "CAN 2.0",
            FrameKind::CanFd => "CAN FD",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for IdentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            IdentKind::Base => "Base",
            IdentKind::Extended => "Extended",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for RtrFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RtrFlag::DataFrame => "Data frame",
            RtrFlag::RtrFrame => "Remote frame",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for BrsFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BrsFlag::Shift => "Shift",
            BrsFlag::DontShift => "Don't shift",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for EsiFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EsiFlag::ErrorActive => "Error active",
            EsiFlag::ErrorPassive => "Error passive",
        };
        write!(f, "{}", name)
    }
}

/// The five frame-shape flags plus per-flag randomisation marks.
///
/// Build one either fully specified with [`FrameFlags::new`], or start from
/// [`FrameFlags::any`] and pin down individual flags:
///
/// ```
/// use canstim::{BrsFlag, FrameFlags, FrameKind};
///
/// // CAN FD frame with bit-rate shift; IDE, RTR and ESI stay open for
/// // randomisation.
/// let flags = FrameFlags::any()
///     .with_kind(FrameKind::CanFd)
///     .with_brs(BrsFlag::Shift);
/// assert!(flags.randomizes_ident_kind());
/// assert!(!flags.randomizes_brs());
/// ```
#[derive(Debug, Copy, Clone)]
pub struct FrameFlags {
    kind: FrameKind,
    ident_kind: IdentKind,
    rtr: RtrFlag,
    brs: BrsFlag,
    esi: EsiFlag,

    randomize_kind: bool,
    randomize_ident_kind: bool,
    randomize_rtr: bool,
    randomize_brs: bool,
    randomize_esi: bool,
}

impl Default for FrameFlags {
    /// Equivalent to [`FrameFlags::any`].
    fn default() -> Self {
        Self::any()
    }
}

impl FrameFlags {
    /// All five flags left open for randomisation.
    ///
    /// Until [`randomize`](Self::randomize) is called the flags read as a
    /// classical base-format data frame.
    pub fn any() -> Self {
        FrameFlags {
            kind: FrameKind::Can20,
            ident_kind: IdentKind::Base,
            rtr: RtrFlag::DataFrame,
            brs: BrsFlag::DontShift,
            esi: EsiFlag::ErrorActive,
            randomize_kind: true,
            randomize_ident_kind: true,
            randomize_rtr: true,
            randomize_brs: true,
            randomize_esi: true,
        }
    }

    /// All five flags fixed, nothing randomised.
    ///
    /// Contradictory combinations are repaired (and logged): RTR is dropped
    /// from CAN FD frames, BRS and ESI are reset on classical frames.
    pub fn new(
        kind: FrameKind,
        ident_kind: IdentKind,
        rtr: RtrFlag,
        brs: BrsFlag,
        esi: EsiFlag,
    ) -> Self {
        let mut flags = FrameFlags {
            kind,
            ident_kind,
            rtr,
            brs,
            esi,
            randomize_kind: false,
            randomize_ident_kind: false,
            randomize_rtr: false,
            randomize_brs: false,
            randomize_esi: false,
        };
        flags.repair();
        flags
    }

    /// Fixes the frame format.
    pub fn with_kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self.randomize_kind = false;
        self.repair();
        self
    }

    /// Fixes the identifier format.
    pub fn with_ident_kind(mut self, ident_kind: IdentKind) -> Self {
        self.ident_kind = ident_kind;
        self.randomize_ident_kind = false;
        self
    }

    /// Fixes the RTR flag.
    pub fn with_rtr(mut self, rtr: RtrFlag) -> Self {
        self.rtr = rtr;
        self.randomize_rtr = false;
        self.repair();
        self
    }

    /// Fixes the BRS flag.
    pub fn with_brs(mut self, brs: BrsFlag) -> Self {
        self.brs = brs;
        self.randomize_brs = false;
        self.repair();
        self
    }

    /// Fixes the ESI flag.
    pub fn with_esi(mut self, esi: EsiFlag) -> Self {
        self.esi = esi;
        self.randomize_esi = false;
        self.repair();
        self
    }

    /// Frame format.
    pub fn frame_kind(&self) -> FrameKind {
        self.kind
    }

    /// Identifier format.
    pub fn ident_kind(&self) -> IdentKind {
        self.ident_kind
    }

    /// RTR flag.
    pub fn rtr(&self) -> RtrFlag {
        self.rtr
    }

    /// BRS flag.
    pub fn brs(&self) -> BrsFlag {
        self.brs
    }

    /// ESI flag.
    pub fn esi(&self) -> EsiFlag {
        self.esi
    }

    /// Whether the frame format is open for randomisation.
    pub fn randomizes_kind(&self) -> bool {
        self.randomize_kind
    }

    /// Whether the identifier format is open for randomisation.
    pub fn randomizes_ident_kind(&self) -> bool {
        self.randomize_ident_kind
    }

    /// Whether the RTR flag is open for randomisation.
    pub fn randomizes_rtr(&self) -> bool {
        self.randomize_rtr
    }

    /// Whether the BRS flag is open for randomisation.
    pub fn randomizes_brs(&self) -> bool {
        self.randomize_brs
    }

    /// Whether the ESI flag is open for randomisation.
    pub fn randomizes_esi(&self) -> bool {
        self.randomize_esi
    }

    /// Samples every flag that was left open, under protocol constraints.
    ///
    /// The frame format and identifier format are drawn uniformly. RTR
    /// frames come out at a 1-in-4 rate for classical frames and never for
    /// CAN FD; BRS and ESI are drawn uniformly for CAN FD and forced to
    /// their classical values otherwise.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.randomize_kind {
            self.kind = if rng.gen_range(0..2) == 1 {
                FrameKind::Can20
            } else {
                FrameKind::CanFd
            };
        }

        if self.randomize_ident_kind {
            self.ident_kind = if rng.gen_range(0..2) == 1 {
                IdentKind::Base
            } else {
                IdentKind::Extended
            };
        }

        if self.randomize_rtr {
            self.rtr = if self.kind == FrameKind::CanFd {
                RtrFlag::DataFrame
            } else if rng.gen_range(0..4) == 1 {
                RtrFlag::RtrFrame
            } else {
                RtrFlag::DataFrame
            };
        }

        if self.randomize_brs {
            self.brs = if self.kind == FrameKind::Can20 {
                BrsFlag::DontShift
            } else if rng.gen_range(0..2) == 1 {
                BrsFlag::Shift
            } else {
                BrsFlag::DontShift
            };
        }

        if self.randomize_esi {
            self.esi = if self.kind == FrameKind::Can20 {
                EsiFlag::ErrorActive
            } else if rng.gen_range(0..2) == 1 {
                EsiFlag::ErrorPassive
            } else {
                EsiFlag::ErrorActive
            };
        }
    }

    /// Repairs contradictory flag combinations.
    fn repair(&mut self) {
        if self.kind == FrameKind::CanFd && self.rtr == RtrFlag::RtrFrame {
            warn!("RTR flag has no meaning on CAN FD frames, dropping it");
            self.rtr = RtrFlag::DataFrame;
        }

        if self.kind == FrameKind::Can20 && self.brs == BrsFlag::Shift {
            warn!("BRS flag has no meaning on CAN 2.0 frames, dropping it");
            self.brs = BrsFlag::DontShift;
        }

        if self.kind == FrameKind::Can20 && self.esi == EsiFlag::ErrorPassive {
            warn!("ESI flag has no meaning on CAN 2.0 frames, dropping it");
            self.esi = EsiFlag::ErrorActive;
        }
    }
}

/// Equality is field-wise over the five flags; randomisation marks are not
/// part of the comparison.
impl PartialEq for FrameFlags {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.ident_kind == other.ident_kind
            && self.rtr == other.rtr
            && self.brs == other.brs
            && self.esi == other.esi
    }
}

impl Eq for FrameFlags {}

impl fmt::Display for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} / {} id / {} / BRS: {} / ESI: {}",
            self.kind, self.ident_kind, self.rtr, self.brs, self.esi
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_any_randomizes_everything() {
        let mut rng = StdRng::seed_from_u64(0x1234);

        let mut flags = FrameFlags::any();
        assert!(
            flags.randomizes_kind()
                && flags.randomizes_ident_kind()
                && flags.randomizes_rtr()
                && flags.randomizes_brs()
                && flags.randomizes_esi()
        );

        for _ in 0..256 {
            flags.randomize(&mut rng);

            // No invalid combination may ever come out.
            assert!(!(flags.frame_kind() == FrameKind::CanFd && flags.rtr() == RtrFlag::RtrFrame));
            assert!(!(flags.frame_kind() == FrameKind::Can20 && flags.brs() == BrsFlag::Shift));
            assert!(!(flags.frame_kind() == FrameKind::Can20 && flags.esi() == EsiFlag::ErrorPassive));
        }
    }

    #[test]
    fn test_fixed_flags_survive_randomization() {
        let mut rng = StdRng::seed_from_u64(0xBEEF);

        let mut flags = FrameFlags::new(
            FrameKind::Can20,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::DontShift,
            EsiFlag::ErrorActive,
        );
        assert!(
            !flags.randomizes_kind()
                && !flags.randomizes_ident_kind()
                && !flags.randomizes_rtr()
                && !flags.randomizes_brs()
                && !flags.randomizes_esi()
        );

        flags.randomize(&mut rng);
        assert_eq!(flags.frame_kind(), FrameKind::Can20);
        assert_eq!(flags.ident_kind(), IdentKind::Base);
        assert_eq!(flags.rtr(), RtrFlag::DataFrame);
        assert_eq!(flags.brs(), BrsFlag::DontShift);
        assert_eq!(flags.esi(), EsiFlag::ErrorActive);
    }

    #[test]
    fn test_partial_fix_keeps_rest_open() {
        let flags = FrameFlags::any()
            .with_kind(FrameKind::CanFd)
            .with_esi(EsiFlag::ErrorPassive);

        assert!(!flags.randomizes_kind());
        assert!(!flags.randomizes_esi());
        assert!(flags.randomizes_ident_kind());
        assert!(flags.randomizes_rtr());
        assert!(flags.randomizes_brs());

        let mut rng = StdRng::seed_from_u64(7);
        let mut flags = flags;
        flags.randomize(&mut rng);
        assert_eq!(flags.frame_kind(), FrameKind::CanFd);
        assert_eq!(flags.esi(), EsiFlag::ErrorPassive);
    }

    #[test]
    fn test_contradictions_repaired() {
        let flags = FrameFlags::new(
            FrameKind::CanFd,
            IdentKind::Base,
            RtrFlag::RtrFrame,
            BrsFlag::Shift,
            EsiFlag::ErrorActive,
        );
        assert_eq!(flags.rtr(), RtrFlag::DataFrame);

        let flags = FrameFlags::new(
            FrameKind::Can20,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::Shift,
            EsiFlag::ErrorPassive,
        );
        assert_eq!(flags.brs(), BrsFlag::DontShift);
        assert_eq!(flags.esi(), EsiFlag::ErrorActive);
    }

    #[test]
    fn test_equality_ignores_marks() {
        let a = FrameFlags::any().with_kind(FrameKind::Can20);
        let b = FrameFlags::new(
            FrameKind::Can20,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::DontShift,
            EsiFlag::ErrorActive,
        );
        assert_eq!(a, b);

        let c = b.with_ident_kind(IdentKind::Extended);
        assert_ne!(b, c);
    }
}
