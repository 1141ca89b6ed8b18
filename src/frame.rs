// canstim/src/frame.rs
//
// Logical CAN frame: flags, identifier, DLC and payload.

//! The logical (metadata-level) CAN frame.
//!
//! A [`Frame`] is what a test case reasons about: frame-shape flags, an
//! identifier, a DLC and payload bytes. Fields left open at construction are
//! filled in by [`Frame::randomize`]; the DLC and the payload length are
//! kept consistent through the ISO 11898-1 DLC table at all times. Expanding
//! a frame into its bit-by-bit representation is the job of
//! [`BitFrame`](crate::BitFrame).

use crate::errors::ConstructionError;
use crate::flags::{FrameFlags, FrameKind, IdentKind, RtrFlag};
use embedded_can::{ExtendedId, Id, StandardId};
use itertools::Itertools;
use rand::Rng;
use std::fmt;

/// Maximum payload length in bytes (CAN FD, DLC 15).
pub const MAX_DATA_LEN: usize = 64;

/// ISO 11898-1 mapping from DLC to payload length in bytes.
const DLC_TO_DATA_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// A logical CAN frame: flags, identifier, DLC and data.
///
/// ```
/// use canstim::{Frame, FrameFlags, FrameKind, IdentKind};
///
/// let flags = FrameFlags::any()
///     .with_kind(FrameKind::CanFd)
///     .with_ident_kind(IdentKind::Base);
/// let frame = Frame::with_data(flags, 0xA, 0x2F5, &[0u8; 16]).unwrap();
/// assert_eq!(frame.data_len(), 16);
/// ```
#[derive(Debug, Copy, Clone)]
pub struct Frame {
    flags: FrameFlags,
    dlc: u8,
    data_len: usize,
    ident: u32,
    data: [u8; MAX_DATA_LEN],

    randomize_dlc: bool,
    randomize_ident: bool,
    randomize_data: bool,
}

impl Frame {
    /// A frame with everything open for randomisation.
    pub fn any() -> Self {
        Frame::base(FrameFlags::any(), true, true, true)
    }

    /// A frame with fixed flags; DLC, identifier and data are randomised.
    pub fn with_flags(flags: FrameFlags) -> Self {
        Frame::base(flags, true, true, true)
    }

    /// A frame with fixed flags and DLC; identifier and data are randomised.
    pub fn with_dlc(flags: FrameFlags, dlc: u8) -> Result<Self, ConstructionError> {
        let mut frame = Frame::base(flags, false, true, true);
        frame.set_dlc(dlc)?;
        Ok(frame)
    }

    /// A frame with fixed flags, DLC and identifier; data is randomised.
    pub fn with_ident(flags: FrameFlags, dlc: u8, ident: u32) -> Result<Self, ConstructionError> {
        let mut frame = Frame::base(flags, false, false, true);
        frame.set_dlc(dlc)?;
        frame.set_ident(ident)?;
        Ok(frame)
    }

    /// A fully specified frame, nothing randomised.
    ///
    /// `data` supplies the payload; bytes beyond the DLC-implied length are
    /// ignored, missing bytes stay zero.
    pub fn with_data(
        flags: FrameFlags,
        dlc: u8,
        ident: u32,
        data: &[u8],
    ) -> Result<Self, ConstructionError> {
        let mut frame = Frame::base(flags, false, false, false);
        frame.set_dlc(dlc)?;
        frame.set_ident(ident)?;
        frame.set_data(data);
        Ok(frame)
    }

    fn base(flags: FrameFlags, rand_dlc: bool, rand_ident: bool, rand_data: bool) -> Self {
        Frame {
            flags,
            dlc: 0,
            data_len: 0,
            ident: 0,
            data: [0; MAX_DATA_LEN],
            randomize_dlc: rand_dlc,
            randomize_ident: rand_ident,
            randomize_data: rand_data,
        }
    }

    /// Frame-shape flags.
    pub fn flags(&self) -> &FrameFlags {
        &self.flags
    }

    /// Data length code.
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Payload length in bytes, always consistent with the DLC.
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Raw identifier value (11 or 29 bits depending on the format).
    pub fn ident(&self) -> u32 {
        self.ident
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    /// Payload byte at `index`. Panics past the payload length.
    pub fn data_byte(&self, index: usize) -> u8 {
        self.data[..self.data_len][index]
    }

    /// Identifier as an [`embedded_can::Id`].
    pub fn id(&self) -> Id {
        match self.flags.ident_kind() {
            // Frame construction validated the ranges.
            IdentKind::Base => StandardId::new(self.ident as u16).unwrap().into(),
            IdentKind::Extended => ExtendedId::new(self.ident).unwrap().into(),
        }
    }

    /// Sets the DLC and recomputes the payload length from the DLC table.
    ///
    /// Classical remote frames always map to length 0, classical data
    /// frames clamp at 8 bytes.
    pub fn set_dlc(&mut self, dlc: u8) -> Result<(), ConstructionError> {
        if dlc > 0xF {
            return Err(ConstructionError::DlcOutOfRange(dlc));
        }
        self.dlc = dlc;
        self.data_len = self.dlc_to_data_len(dlc);
        Ok(())
    }

    /// Sets the payload length, reverse-mapping it to a DLC.
    ///
    /// Lengths the DLC table cannot encode are rejected, as are lengths
    /// above 8 for classical frames.
    pub fn set_data_len(&mut self, data_len: usize) -> Result<(), ConstructionError> {
        let dlc = data_len_to_dlc(data_len).ok_or(ConstructionError::InvalidDataLength(data_len))?;
        if self.flags.frame_kind() == FrameKind::Can20 && data_len > 8 {
            return Err(ConstructionError::TooMuchData(data_len));
        }
        self.data_len = data_len;
        self.dlc = dlc;
        Ok(())
    }

    /// Sets the identifier, validating it against the identifier format.
    pub fn set_ident(&mut self, ident: u32) -> Result<(), ConstructionError> {
        let max_bits = match self.flags.ident_kind() {
            IdentKind::Base => 11,
            IdentKind::Extended => 29,
        };
        if ident >= 1 << max_bits {
            return Err(ConstructionError::IdentTooLarge(ident));
        }
        self.ident = ident;
        Ok(())
    }

    /// Copies `data` into the payload buffer, up to the DLC-implied length.
    pub fn set_data(&mut self, data: &[u8]) {
        let n = data.len().min(self.data_len);
        self.data[..n].copy_from_slice(&data[..n]);
    }

    /// Randomises every field left open at construction.
    ///
    /// Flags go first since they constrain the rest: the identifier is
    /// masked to 11 or 29 bits, the DLC stays at 8 or below for classical
    /// frames, and the payload length follows the (possibly new) flags.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.flags.randomize(rng);

        // The RTR flag or frame format may have changed, refresh the
        // payload length derived from the current DLC.
        self.data_len = self.dlc_to_data_len(self.dlc);

        if self.randomize_ident {
            let mask = match self.flags.ident_kind() {
                IdentKind::Base => (1 << 11) - 1,
                IdentKind::Extended => (1 << 29) - 1,
            };
            self.ident = rng.gen::<u32>() & mask;
        }

        if self.randomize_dlc {
            self.dlc = if self.flags.frame_kind() == FrameKind::Can20 {
                rng.gen_range(0..=8)
            } else {
                rng.gen_range(0..=15)
            };
            self.data_len = self.dlc_to_data_len(self.dlc);
        }

        if self.randomize_data {
            self.data = [0; MAX_DATA_LEN];
            for byte in &mut self.data[..self.data_len] {
                *byte = rng.gen();
            }
        }
    }

    fn dlc_to_data_len(&self, dlc: u8) -> usize {
        if self.flags.frame_kind() == FrameKind::Can20 && self.flags.rtr() == RtrFlag::RtrFrame {
            return 0;
        }
        if self.flags.frame_kind() == FrameKind::Can20 && dlc >= 8 {
            return 8;
        }
        DLC_TO_DATA_LEN[dlc as usize]
    }
}

/// Reverse DLC-table lookup.
fn data_len_to_dlc(data_len: usize) -> Option<u8> {
    DLC_TO_DATA_LEN
        .iter()
        .position(|&len| len == data_len)
        .map(|dlc| dlc as u8)
}

/// Equality compares flags, identifier, DLC and the live payload bytes;
/// randomisation marks do not participate.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.dlc == other.dlc
            && self.ident == other.ident
            && self.data() == other.data()
    }
}

impl Eq for Frame {}

impl embedded_can::Frame for Frame {
    /// Creates a data frame; classical when the payload fits 8 bytes, CAN FD
    /// otherwise. Fails on payload lengths the DLC table cannot encode.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let (ident_kind, raw) = split_id(id.into());
        let kind = if data.len() <= 8 {
            FrameKind::Can20
        } else {
            FrameKind::CanFd
        };
        let flags = FrameFlags::any().with_kind(kind).with_ident_kind(ident_kind);
        let dlc = data_len_to_dlc(data.len())?;
        Frame::with_data(flags, dlc, raw, data).ok()
    }

    /// Creates a classical remote frame. Fails for a DLC above 8.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        let (ident_kind, raw) = split_id(id.into());
        let flags = FrameFlags::any()
            .with_kind(FrameKind::Can20)
            .with_ident_kind(ident_kind)
            .with_rtr(RtrFlag::RtrFrame);
        Frame::with_data(flags, dlc as u8, raw, &[]).ok()
    }

    fn is_extended(&self) -> bool {
        self.flags.ident_kind() == IdentKind::Extended
    }

    fn is_remote_frame(&self) -> bool {
        self.flags.rtr() == RtrFlag::RtrFrame
    }

    fn id(&self) -> Id {
        Frame::id(self)
    }

    fn dlc(&self) -> usize {
        self.data_len
    }

    fn data(&self) -> &[u8] {
        Frame::data(self)
    }
}

fn split_id(id: Id) -> (IdentKind, u32) {
    match id {
        Id::Standard(id) => (IdentKind::Base, id.as_raw() as u32),
        Id::Extended(id) => (IdentKind::Extended, id.as_raw()),
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, ID 0x{:X}, DLC 0x{:X} ({} bytes)",
            self.flags, self.ident, self.dlc, self.data_len
        )?;
        if self.data_len > 0 {
            let bytes = self.data().iter().map(|b| format!("{:02X}", b)).join(" ");
            write!(f, ", data {}", bytes)?;
        }
        Ok(())
    }
}

impl fmt::UpperHex for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}#", self.ident)?;
        let sep = if f.alternate() { " " } else { "" };
        let mut parts = self.data().iter().map(|b| format!("{:02X}", b));
        write!(f, "{}", parts.join(sep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{BrsFlag, EsiFlag};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_randomized_lengths_follow_dlc_table() {
        let mut rng = StdRng::seed_from_u64(0xCAFE);
        let mut frame = Frame::any();

        for _ in 0..256 {
            frame.randomize(&mut rng);

            assert!(frame.dlc() <= 0xF);
            assert!(DLC_TO_DATA_LEN.contains(&frame.data_len()));
            if frame.flags().frame_kind() == FrameKind::Can20 {
                assert!(frame.data_len() <= 8);
            }

            let max_bits = match frame.flags().ident_kind() {
                IdentKind::Base => 11,
                IdentKind::Extended => 29,
            };
            assert!(frame.ident() < 1 << max_bits);
        }
    }

    #[test]
    fn test_fixed_fields_survive_randomization() {
        let mut rng = StdRng::seed_from_u64(42);
        let flags = FrameFlags::any();
        let mut frame = Frame::with_data(flags, 4, 100, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        frame.randomize(&mut rng);

        assert_eq!(frame.ident(), 100);
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.data(), &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_rtr_and_classical_clamping() {
        let flags = FrameFlags::new(
            FrameKind::Can20,
            IdentKind::Base,
            RtrFlag::RtrFrame,
            BrsFlag::DontShift,
            EsiFlag::ErrorActive,
        );
        let frame = Frame::with_ident(flags, 6, 0x55).unwrap();
        // Remote frames carry no data regardless of DLC.
        assert_eq!(frame.data_len(), 0);

        let flags = FrameFlags::new(
            FrameKind::Can20,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::DontShift,
            EsiFlag::ErrorActive,
        );
        let mut frame = Frame::with_ident(flags, 0xC, 0x55).unwrap();
        // Classical data frames clamp DLC >= 8 to 8 bytes.
        assert_eq!(frame.data_len(), 8);

        assert_eq!(
            frame.set_data_len(12),
            Err(ConstructionError::TooMuchData(12))
        );
        frame.set_data_len(8).unwrap();
        assert_eq!(frame.dlc(), 8);
    }

    #[test]
    fn test_data_len_reverse_mapping() {
        let flags = FrameFlags::any().with_kind(FrameKind::CanFd);
        let mut frame = Frame::with_dlc(flags, 0).unwrap();

        frame.set_data_len(48).unwrap();
        assert_eq!(frame.dlc(), 14);

        assert_eq!(
            frame.set_data_len(13),
            Err(ConstructionError::InvalidDataLength(13))
        );
    }

    #[test]
    fn test_ident_range_checked() {
        let flags = FrameFlags::any().with_ident_kind(IdentKind::Base);
        assert!(Frame::with_ident(flags, 0, 0x7FF).is_ok());
        assert_eq!(
            Frame::with_ident(flags, 0, 0x800).unwrap_err(),
            ConstructionError::IdentTooLarge(0x800)
        );

        let flags = FrameFlags::any().with_ident_kind(IdentKind::Extended);
        assert!(Frame::with_ident(flags, 0, 0x1FFF_FFFF).is_ok());
        assert!(Frame::with_ident(flags, 0, 0x2000_0000).is_err());
    }

    #[test]
    fn test_equality() {
        let flags = FrameFlags::any().with_kind(FrameKind::CanFd);
        let a = Frame::with_data(flags, 4, 100, &[0, 1, 2, 3]).unwrap();
        let b = Frame::with_data(flags, 4, 100, &[0, 1, 2, 3]).unwrap();
        assert_eq!(a, b);

        let c = Frame::with_data(flags, 3, 100, &[0, 1, 2]).unwrap();
        assert_ne!(a, c);

        let d = Frame::with_data(flags, 4, 100, &[0, 1, 2, 0xC]).unwrap();
        assert_ne!(a, d);

        let flags20 = FrameFlags::any().with_kind(FrameKind::Can20);
        let e = Frame::with_data(flags20, 4, 100, &[0, 1, 2, 3]).unwrap();
        assert_ne!(a, e);
    }

    #[test]
    fn test_embedded_can_interop() {
        use embedded_can::Frame as _;

        let id = StandardId::new(0x123).unwrap();
        let frame = Frame::new(id, &[1, 2, 3]).unwrap();
        assert!(!frame.is_extended());
        assert!(frame.is_data_frame());
        assert_eq!(frame.flags().frame_kind(), FrameKind::Can20);
        assert_eq!(embedded_can::Frame::data(&frame), &[1, 2, 3]);

        // 12 bytes only fit a CAN FD frame.
        let frame = Frame::new(id, &[0u8; 12]).unwrap();
        assert_eq!(frame.flags().frame_kind(), FrameKind::CanFd);

        // 13 bytes fit no DLC at all.
        assert!(Frame::new(id, &[0u8; 13]).is_none());

        let remote = Frame::new_remote(id, 4).unwrap();
        assert!(remote.is_remote_frame());
        assert_eq!(remote.data_len(), 0);
    }

    #[test]
    fn test_hex_format() {
        let flags = FrameFlags::any()
            .with_kind(FrameKind::Can20)
            .with_ident_kind(IdentKind::Base);
        let frame = Frame::with_data(flags, 3, 0x1AB, &[0xDE, 0xAD, 0x01]).unwrap();
        assert_eq!(format!("{:X}", frame), "1AB#DEAD01");
        assert_eq!(format!("{:#X}", frame), "1AB#DE AD 01");
    }
}
