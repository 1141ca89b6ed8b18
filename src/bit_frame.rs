// canstim/src/bit_frame.rs
//
// Bit-level frame model: builder, stuffing, CRC, error splicing.

//! The bit-by-bit representation of a CAN frame and its mutation engine.
//!
//! [`BitFrame`] expands a logical [`Frame`] into the exact bit sequence a
//! transmitter puts on the wire: field bits in ISO 11898-1 order, normal and
//! fixed stuff bits, the Gray-coded stuff count and the CRC the frame
//! format calls for. Compliance tests then mutate the result (flip bits,
//! splice error and overload frames, model arbitration loss, force
//! individual time quanta) before serialising it into driver and monitor
//! streams with [`TestSequence`](crate::TestSequence).
//!
//! Mutators address bits by index. Out-of-range indices and structurally
//! impossible requests (an error frame at the start of frame, recomputing a
//! CRC while stuff bits are present) are test-construction bugs and panic.

use crate::bit::{Bit, BitKind, StuffKind};
use crate::flags::{BitValue, BrsFlag, EsiFlag, FrameFlags, FrameKind, IdentKind, RtrFlag};
use crate::frame::Frame;
use crate::timing::BitTiming;
use log::warn;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Position of one clock cycle inside a frame: bit, quantum within the bit,
/// cycle within the quantum.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CyclePos {
    /// Bit index within the frame.
    pub bit: usize,
    /// Time quantum index within the bit.
    pub quantum: usize,
    /// Cycle index within the quantum.
    pub cycle: usize,
}

/// A frame expanded to individual bus bits.
///
/// Construction runs the full pipeline: field bits, stuff insertion, CRC
/// computation and (for CAN FD) the stuff-count field and fixed stuff bits.
/// The result is immediately serialisable; every later mutation works on
/// the bit list in place.
///
/// ```
/// use canstim::{BitFrame, BitKind, BitTiming, Frame, FrameFlags, FrameKind};
///
/// let flags = FrameFlags::any().with_kind(FrameKind::Can20);
/// let frame = Frame::with_data(flags, 1, 0x7A, &[0x42]).unwrap();
/// let bit_frame = BitFrame::new(frame, BitTiming::default(), BitTiming::default());
///
/// assert_eq!(bit_frame.bit(0).kind(), BitKind::Sof);
/// assert_eq!(bit_frame.field_len(BitKind::Eof), 7);
/// ```
#[derive(Debug, Clone)]
pub struct BitFrame {
    frame: Frame,
    crc15: u32,
    crc17: u32,
    crc21: u32,
    stuff_cnt: u8,
    stuff_cnt_encoded: u8,
    nominal: BitTiming,
    data: BitTiming,
    bits: Vec<Bit>,
}

impl BitFrame {
    /// Expands `frame` into its wire-level bit sequence.
    pub fn new(frame: Frame, nominal: BitTiming, data: BitTiming) -> Self {
        let mut bf = BitFrame {
            frame,
            crc15: 0,
            crc17: 0,
            crc21: 0,
            stuff_cnt: 0,
            stuff_cnt_encoded: 0,
            nominal,
            data,
            bits: Vec::new(),
        };
        bf.construct();
        bf
    }

    fn construct(&mut self) {
        self.build_bits();

        if self.flags().frame_kind() == FrameKind::Can20 {
            // CRC must be in place before stuffing: classical frames get
            // regular stuff bits inside the CRC field as well.
            self.calc_crc();
            self.update_crc_bits();
            self.insert_normal_stuff_bits();
        } else {
            self.insert_normal_stuff_bits();
            self.set_stuff_count();
            self.set_stuff_parity();
            self.insert_stuff_to_stuff_count();
            self.calc_crc();
            self.update_crc_bits();
            self.insert_fixed_stuff_to_crc();
        }
    }

    /// The logical frame this bit frame was built from.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Frame-shape flags.
    pub fn flags(&self) -> &FrameFlags {
        self.frame.flags()
    }

    /// Nominal bit-timing configuration.
    pub fn nominal_timing(&self) -> BitTiming {
        self.nominal
    }

    /// Data bit-timing configuration.
    pub fn data_timing(&self) -> BitTiming {
        self.data
    }

    /// Number of bits currently in the frame.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the bit list is empty (only true mid-surgery).
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// All bits in bus order.
    pub fn bits(&self) -> &[Bit] {
        &self.bits
    }

    /// Bit at `index`. Panics when the frame is shorter.
    pub fn bit(&self, index: usize) -> &Bit {
        assert!(index < self.bits.len(), "frame has no bit {}", index);
        &self.bits[index]
    }

    /// Mutable bit at `index`. Panics like [`bit`](Self::bit).
    pub fn bit_mut(&mut self, index: usize) -> &mut Bit {
        assert!(index < self.bits.len(), "frame has no bit {}", index);
        &mut self.bits[index]
    }

    /// The CRC transmitted by this frame: CRC-15 for classical frames,
    /// CRC-17 for CAN FD up to 16 data bytes, CRC-21 above.
    pub fn crc(&self) -> u32 {
        if self.flags().frame_kind() == FrameKind::Can20 {
            self.crc15
        } else if self.frame.data_len() <= 16 {
            self.crc17
        } else {
            self.crc21
        }
    }

    /// Number of normal stuff bits inserted, modulo 8.
    ///
    /// Classical frames track this too, but only CAN FD frames transmit it.
    pub fn stuff_count(&self) -> u8 {
        self.stuff_cnt
    }

    /// The Gray-coded stuff count as transmitted (CAN FD).
    pub fn stuff_count_encoded(&self) -> u8 {
        self.stuff_cnt_encoded
    }

    /// The 11-bit base part of the identifier.
    pub fn base_ident(&self) -> u32 {
        match self.flags().ident_kind() {
            IdentKind::Extended => self.frame.ident() >> 18,
            IdentKind::Base => self.frame.ident(),
        }
    }

    /// The 18-bit extension part of the identifier (zero for base frames).
    pub fn ext_ident(&self) -> u32 {
        match self.flags().ident_kind() {
            IdentKind::Extended => self.frame.ident() & 0x3FFFF,
            IdentKind::Base => 0,
        }
    }

    // ===== queries =====

    /// Number of bits of `kind` (stuff bits included).
    pub fn field_len(&self, kind: BitKind) -> usize {
        self.bits.iter().filter(|b| b.kind() == kind).count()
    }

    /// Index of the `n`-th bit of `kind`.
    ///
    /// Panics when the frame has fewer such bits.
    pub fn index_of(&self, n: usize, kind: BitKind) -> usize {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| b.kind() == kind)
            .map(|(i, _)| i)
            .nth(n)
            .unwrap_or_else(|| panic!("frame has no bit {} of kind {}", n, kind))
    }

    /// The `n`-th bit of `kind`. Panics when the frame has fewer such bits.
    pub fn bit_of(&self, n: usize, kind: BitKind) -> &Bit {
        let index = self.index_of(n, kind);
        &self.bits[index]
    }

    /// Mutable variant of [`bit_of`](Self::bit_of).
    pub fn bit_of_mut(&mut self, n: usize, kind: BitKind) -> &mut Bit {
        let index = self.index_of(n, kind);
        &mut self.bits[index]
    }

    /// Index of the `n`-th non-stuff bit of `kind`.
    ///
    /// Panics when the frame has fewer such bits.
    pub fn index_of_no_stuff(&self, n: usize, kind: BitKind) -> usize {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| b.kind() == kind && b.stuff_kind() == StuffKind::NoStuff)
            .map(|(i, _)| i)
            .nth(n)
            .unwrap_or_else(|| panic!("frame has no non-stuff bit {} of kind {}", n, kind))
    }

    /// The `n`-th non-stuff bit of `kind`.
    pub fn bit_of_no_stuff(&self, n: usize, kind: BitKind) -> &Bit {
        let index = self.index_of_no_stuff(n, kind);
        &self.bits[index]
    }

    /// Index of the first bit of `kind`, if any.
    fn find_kind(&self, kind: BitKind) -> Option<usize> {
        self.bits.iter().position(|b| b.kind() == kind)
    }

    /// Index of the `n`-th stuff bit (normal or fixed), if present.
    pub fn stuff_bit_index(&self, n: usize) -> Option<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_stuff_bit())
            .map(|(i, _)| i)
            .nth(n)
    }

    /// Index of the `n`-th fixed stuff bit, if present.
    pub fn fixed_stuff_bit_index(&self, n: usize) -> Option<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| b.stuff_kind() == StuffKind::Fixed)
            .map(|(i, _)| i)
            .nth(n)
    }

    /// Number of stuff bits of `stuff_kind`.
    pub fn num_stuff_bits(&self, stuff_kind: StuffKind) -> usize {
        self.bits
            .iter()
            .filter(|b| b.stuff_kind() == stuff_kind)
            .count()
    }

    /// Number of stuff bits of `stuff_kind` within field `kind`.
    pub fn num_stuff_bits_of(&self, kind: BitKind, stuff_kind: StuffKind) -> usize {
        self.bits
            .iter()
            .filter(|b| b.kind() == kind && b.stuff_kind() == stuff_kind)
            .count()
    }

    /// Number of stuff bits of `stuff_kind` with line value `value`.
    pub fn num_stuff_bits_with(&self, stuff_kind: StuffKind, value: BitValue) -> usize {
        self.bits
            .iter()
            .filter(|b| b.stuff_kind() == stuff_kind && b.value() == value)
            .count()
    }

    /// Index of a uniformly random bit of `kind`.
    ///
    /// Panics when the frame has no such bit.
    pub fn random_index_of<R: Rng + ?Sized>(&self, kind: BitKind, rng: &mut R) -> usize {
        let count = self.field_len(kind);
        assert!(count > 0, "frame has no bits of kind {}", kind);
        self.index_of(rng.gen_range(0..count), kind)
    }

    /// Index of a random bit with line value `value`.
    ///
    /// Panics when no bit carries `value`.
    pub fn random_index_with<R: Rng + ?Sized>(&self, value: BitValue, rng: &mut R) -> usize {
        assert!(
            self.bits.iter().any(|b| b.value() == value),
            "frame has no bit with value {}",
            value
        );
        loop {
            let index = rng.gen_range(0..self.bits.len());
            if self.bits[index].value() == value {
                return index;
            }
        }
    }

    // ===== structural editing =====

    /// Builds a bit carrying this frame's flags and timing context, for
    /// insertion via [`insert_bit`](Self::insert_bit) or
    /// [`append_bit`](Self::append_bit).
    pub fn new_bit(&self, kind: BitKind, value: BitValue) -> Bit {
        Bit::new(kind, value, *self.flags(), self.nominal, self.data)
    }

    /// Appends `bit` at the end of the frame.
    pub fn append_bit(&mut self, bit: Bit) {
        self.bits.push(bit);
    }

    /// Inserts a new bit of `kind` and `value` before position `index`.
    ///
    /// Panics when `index` is past the end.
    pub fn insert_bit(&mut self, index: usize, kind: BitKind, value: BitValue) {
        assert!(index <= self.bits.len(), "frame has no position {}", index);
        let bit = self.new_bit(kind, value);
        self.bits.insert(index, bit);
    }

    /// Removes the bit at `index`. Panics when the frame is shorter.
    pub fn remove_bit(&mut self, index: usize) {
        assert!(index < self.bits.len(), "frame has no bit {}", index);
        self.bits.remove(index);
    }

    /// Removes the `n`-th bit of `kind`. Panics when the frame has fewer
    /// such bits.
    pub fn remove_bit_of(&mut self, n: usize, kind: BitKind) {
        let index = self.index_of(n, kind);
        self.bits.remove(index);
    }

    /// Drops every bit from `index` to the end. Panics when `index` is past
    /// the end.
    pub fn remove_bits_from(&mut self, index: usize) {
        assert!(index <= self.bits.len(), "frame has no position {}", index);
        self.bits.truncate(index);
    }

    /// Appends a copy of every bit of `other` to this frame, e.g. to model
    /// back-to-back frames in one monitored sequence.
    pub fn append_frame(&mut self, other: &BitFrame) {
        self.bits.extend(other.bits.iter().cloned());
    }

    // ===== error and overload frames =====

    /// Splices an active error frame at `index`: the frame is truncated
    /// there and 6 dominant error-flag bits, 8 recessive error-delimiter
    /// bits and 3 recessive intermission bits are appended.
    ///
    /// Panics at index 0; a real controller never starts an error frame
    /// instead of SOF.
    pub fn insert_act_err_frm(&mut self, index: usize) {
        self.insert_err_flag(index, BitKind::ActErrFlag);
        self.append_err_delim_and_interm();
    }

    /// Splices a passive error frame at `index`: like
    /// [`insert_act_err_frm`](Self::insert_act_err_frm) with 6 recessive
    /// error-flag bits.
    pub fn insert_pas_err_frm(&mut self, index: usize) {
        self.insert_err_flag(index, BitKind::PasErrFlag);
        self.append_err_delim_and_interm();
    }

    fn insert_err_flag(&mut self, index: usize, kind: BitKind) {
        assert!(index > 0, "error frame cannot replace SOF");
        assert!(index < self.bits.len(), "frame has no bit {}", index);
        debug_assert!(kind == BitKind::ActErrFlag || kind == BitKind::PasErrFlag);

        self.bits.truncate(index);

        // The controller falls back to the nominal bit rate at the sample
        // point before the error frame.
        self.bits[index - 1].correct_ph2_to_nominal();

        let value = if kind == BitKind::ActErrFlag {
            BitValue::Dominant
        } else {
            BitValue::Recessive
        };
        for _ in 0..6 {
            let bit = self.new_bit(kind, value);
            self.bits.push(bit);
        }
    }

    fn append_err_delim_and_interm(&mut self) {
        for _ in 0..8 {
            let bit = self.new_bit(BitKind::ErrDelim, BitValue::Recessive);
            self.bits.push(bit);
        }
        for _ in 0..3 {
            let bit = self.new_bit(BitKind::Interm, BitValue::Recessive);
            self.bits.push(bit);
        }
    }

    /// Splices an overload frame at `index`: 6 dominant overload-flag bits,
    /// 8 recessive overload-delimiter bits, 3 recessive intermission bits.
    ///
    /// Overload frames may only start inside intermission or after an
    /// error/overload delimiter; other positions are refused with `false`.
    /// Panics when `index` is out of range.
    pub fn insert_ovrl_frm(&mut self, index: usize) -> bool {
        assert!(index < self.bits.len(), "frame has no bit {}", index);

        let kind = self.bits[index].kind();
        if !matches!(
            kind,
            BitKind::Interm | BitKind::ErrDelim | BitKind::OvrlDelim
        ) {
            warn!("cannot start an overload frame inside {} field", kind);
            return false;
        }

        self.bits.truncate(index);
        for _ in 0..6 {
            let bit = self.new_bit(BitKind::OvrlFlag, BitValue::Dominant);
            self.bits.push(bit);
        }
        for _ in 0..8 {
            let bit = self.new_bit(BitKind::OvrlDelim, BitValue::Recessive);
            self.bits.push(bit);
        }
        for _ in 0..3 {
            let bit = self.new_bit(BitKind::Interm, BitValue::Recessive);
            self.bits.push(bit);
        }
        true
    }

    /// Appends the 8 recessive suspend-transmission bits an error-passive
    /// transmitter inserts after its intermission.
    pub fn append_susp_trans(&mut self) {
        for _ in 0..8 {
            let bit = self.new_bit(BitKind::SuspTrans, BitValue::Recessive);
            self.bits.push(bit);
        }
    }

    // ===== arbitration and RX conversion =====

    /// Models losing arbitration at `index`: every bit from there on turns
    /// recessive (the node only listens) and the ACK slot goes dominant
    /// (the node acknowledges the winner's frame).
    ///
    /// Only bits of the arbitration field qualify; `R1` is accepted as well
    /// to model losing against a CAN FD frame at the RTR position. Other
    /// positions are refused with `false`. Panics when `index` is out of
    /// range.
    pub fn loose_arbit(&mut self, index: usize) -> bool {
        assert!(index < self.bits.len(), "frame has no bit {}", index);

        let kind = self.bits[index].kind();
        if !matches!(
            kind,
            BitKind::BaseIdent
                | BitKind::ExtIdent
                | BitKind::Rtr
                | BitKind::Srr
                | BitKind::Ide
                | BitKind::R1
        ) {
            warn!("cannot lose arbitration on {} field", kind);
            return false;
        }

        for bit in &mut self.bits[index..] {
            bit.set_value(BitValue::Recessive);
        }
        self.put_ack();
        true
    }

    /// Converts the frame into what a receiving node drives: everything
    /// recessive except a dominant ACK.
    pub fn turn_received(&mut self) {
        for bit in &mut self.bits {
            bit.set_value(BitValue::Recessive);
        }
        self.put_ack();
    }

    /// Drives the first ACK slot bit dominant.
    pub fn put_ack(&mut self) {
        self.bit_of_mut(0, BitKind::Ack).set_value(BitValue::Dominant);
    }

    /// Drives the first ACK slot bit dominant and compensates the
    /// recessive-to-dominant edge for the IUT's input delay.
    pub fn put_ack_with_delay(&mut self, input_delay: usize) {
        let index = self.index_of(0, BitKind::Ack);
        self.bits[index].set_value(BitValue::Dominant);
        self.compensate_edge_for_input_delay(index, input_delay);
    }

    // ===== input-delay compensation =====

    /// Walks `count` cycles backwards from `from` across quantum and bit
    /// boundaries.
    ///
    /// Panics when the walk would leave the frame at the front.
    pub fn move_cycles_back(&self, from: CyclePos, count: usize) -> CyclePos {
        let mut pos = from;
        for _ in 0..count {
            if pos.cycle > 0 {
                pos.cycle -= 1;
                continue;
            }
            // Step into the previous non-empty quantum, crossing bit
            // boundaries as needed. Quanta emptied by cycle-level
            // shortening are skipped.
            loop {
                if pos.quantum > 0 {
                    pos.quantum -= 1;
                } else {
                    assert!(pos.bit > 0, "cannot move past the start of frame");
                    pos.bit -= 1;
                    let quanta = self.bits[pos.bit].len_tq_total();
                    assert!(quanta > 0, "cannot move through an empty bit");
                    pos.quantum = quanta - 1;
                }
                let cycles = self.bits[pos.bit].quantum(pos.quantum).len_cycles();
                if cycles > 0 {
                    pos.cycle = cycles - 1;
                    break;
                }
            }
        }
        pos
    }

    /// Forces the `input_delay` cycles before the start of the dominant bit
    /// at `bit_index` to dominant.
    ///
    /// The IUT samples its RX pin with a pipeline delay; an edge fabricated
    /// by the test right at a bit boundary would reach the IUT late and
    /// cause an unwanted resynchronisation. Pulling the edge backwards by
    /// the input delay keeps the sample point clean.
    pub fn compensate_edge_for_input_delay(&mut self, bit_index: usize, input_delay: usize) {
        assert!(
            self.bit(bit_index).value() == BitValue::Dominant,
            "input-delay compensation must end at a dominant bit"
        );
        assert!(
            bit_index > 0 && self.bit(bit_index - 1).value() == BitValue::Recessive,
            "input-delay compensation must start at a recessive bit"
        );

        let edge = CyclePos {
            bit: bit_index,
            quantum: 0,
            cycle: 0,
        };
        for i in 0..input_delay {
            let pos = self.move_cycles_back(edge, i + 1);
            self.bits[pos.bit]
                .quantum_mut(pos.quantum)
                .cycle_mut(pos.cycle)
                .force(BitValue::Dominant);
        }
    }

    /// Flips the bit at `bit_index`; when the flip fabricates a new
    /// recessive-to-dominant edge, compensates it for the input delay.
    pub fn flip_bit_and_compensate(&mut self, bit_index: usize, input_delay: usize) {
        self.bit_mut(bit_index).flip();

        // Flipping the first bit introduces no edge inside the frame.
        if bit_index == 0 {
            return;
        }

        if self.bits[bit_index].value() == BitValue::Dominant
            && self.bits[bit_index - 1].value() == BitValue::Recessive
        {
            self.compensate_edge_for_input_delay(bit_index, input_delay);
        }
    }

    // ===== re-stuffing after mutation =====

    /// Strips every stuff bit and redoes the stuffing pipeline, optionally
    /// recomputing the CRC first.
    ///
    /// Call this after editing bit values in non-CRC fields so the stuffing
    /// and (with `recalc_crc`) the CRC match the mutated content. On an
    /// unmutated frame, `update_frame(false)` and `update_frame(true)` both
    /// reproduce the builder output.
    pub fn update_frame(&mut self, recalc_crc: bool) {
        self.bits.retain(|b| b.stuff_kind() == StuffKind::NoStuff);

        if self.flags().frame_kind() == FrameKind::Can20 {
            if recalc_crc {
                self.calc_crc();
                self.update_crc_bits();
            }
            self.insert_normal_stuff_bits();
        } else {
            self.insert_normal_stuff_bits();
            self.set_stuff_count();
            self.set_stuff_parity();
            self.insert_stuff_to_stuff_count();
            if recalc_crc {
                self.calc_crc();
                self.update_crc_bits();
            }
            self.insert_fixed_stuff_to_crc();
        }
    }

    // ===== frame builder =====

    /// Appends the field bits in wire order, with placeholder stuff-count
    /// and CRC contents.
    fn build_bits(&mut self) {
        let flags = *self.flags();
        self.bits.clear();

        self.push_bit(BitKind::Sof, BitValue::Dominant);

        // Base identifier, MSB first.
        let base_id = self.base_ident();
        for i in (0..11).rev() {
            self.push_bit_lsb(BitKind::BaseIdent, base_id >> i);
        }

        // The slot after the base identifier: SRR for extended frames,
        // otherwise r1 (CAN FD) or RTR (classical).
        if flags.ident_kind() == IdentKind::Extended {
            self.push_bit(BitKind::Srr, BitValue::Recessive);
        } else if flags.frame_kind() == FrameKind::CanFd {
            self.push_bit(BitKind::R1, BitValue::Dominant);
        } else if flags.rtr() == RtrFlag::RtrFrame {
            self.push_bit(BitKind::Rtr, BitValue::Recessive);
        } else {
            self.push_bit(BitKind::Rtr, BitValue::Dominant);
        }

        // IDE, identifier extension, and the slot after the extension.
        if flags.ident_kind() == IdentKind::Extended {
            self.push_bit(BitKind::Ide, BitValue::Recessive);

            let ext_id = self.ext_ident();
            for i in (0..18).rev() {
                self.push_bit_lsb(BitKind::ExtIdent, ext_id >> i);
            }

            if flags.frame_kind() == FrameKind::CanFd {
                self.push_bit(BitKind::R1, BitValue::Dominant);
            } else if flags.rtr() == RtrFlag::RtrFrame {
                self.push_bit(BitKind::Rtr, BitValue::Recessive);
            } else {
                self.push_bit(BitKind::Rtr, BitValue::Dominant);
            }
        } else {
            self.push_bit(BitKind::Ide, BitValue::Dominant);
        }

        // EDL / r0 / r1 discriminator.
        if flags.frame_kind() == FrameKind::CanFd {
            self.push_bit(BitKind::Edl, BitValue::Recessive);
        } else if flags.ident_kind() == IdentKind::Extended {
            self.push_bit(BitKind::R1, BitValue::Dominant);
        } else {
            self.push_bit(BitKind::R0, BitValue::Dominant);
        }

        // Extra r0 after EDL, also present in extended classical frames.
        if flags.frame_kind() == FrameKind::CanFd
            || flags.ident_kind() == IdentKind::Extended
        {
            self.push_bit(BitKind::R0, BitValue::Dominant);
        }

        // BRS and ESI only exist on CAN FD frames.
        if flags.frame_kind() == FrameKind::CanFd {
            if flags.brs() == BrsFlag::Shift {
                self.push_bit(BitKind::Brs, BitValue::Recessive);
            } else {
                self.push_bit(BitKind::Brs, BitValue::Dominant);
            }
            if flags.esi() == EsiFlag::ErrorActive {
                self.push_bit(BitKind::Esi, BitValue::Dominant);
            } else {
                self.push_bit(BitKind::Esi, BitValue::Recessive);
            }
        }

        // DLC, MSB first.
        let dlc = self.frame.dlc() as u32;
        for i in (0..4).rev() {
            self.push_bit_lsb(BitKind::Dlc, dlc >> i);
        }

        // Data field, byte-major, MSB first within each byte.
        for byte_index in 0..self.frame.data_len() {
            let byte = self.frame.data_byte(byte_index) as u32;
            for i in (0..8).rev() {
                self.push_bit_lsb(BitKind::Data, byte >> i);
            }
        }

        // Stuff count and parity placeholders; the real values depend on
        // the stuff bits which do not exist yet.
        if flags.frame_kind() == FrameKind::CanFd {
            for _ in 0..3 {
                self.push_bit(BitKind::StuffCnt, BitValue::Dominant);
            }
            self.push_bit(BitKind::StuffParity, BitValue::Recessive);
        }

        // CRC placeholder; for CAN FD the value depends on the stuff bits.
        for _ in 0..self.crc_len() {
            self.push_bit(BitKind::Crc, BitValue::Recessive);
        }

        // CRC delimiter and the ACK slot. The CAN FD ACK slot is two bits
        // wide to tolerate phase differences between nodes.
        self.push_bit(BitKind::CrcDelim, BitValue::Recessive);
        self.push_bit(BitKind::Ack, BitValue::Recessive);
        if flags.frame_kind() == FrameKind::CanFd {
            self.push_bit(BitKind::Ack, BitValue::Recessive);
        }
        self.push_bit(BitKind::AckDelim, BitValue::Recessive);

        for _ in 0..7 {
            self.push_bit(BitKind::Eof, BitValue::Recessive);
        }
        for _ in 0..3 {
            self.push_bit(BitKind::Interm, BitValue::Recessive);
        }
    }

    fn push_bit(&mut self, kind: BitKind, value: BitValue) {
        let bit = self.new_bit(kind, value);
        self.bits.push(bit);
    }

    fn push_bit_lsb(&mut self, kind: BitKind, bits: u32) {
        self.push_bit(kind, BitValue::from_lsb(bits));
    }

    fn crc_len(&self) -> usize {
        if self.flags().frame_kind() == FrameKind::Can20 {
            15
        } else if self.frame.data_len() <= 16 {
            17
        } else {
            21
        }
    }

    // ===== stuff engine =====

    /// Inserts normal stuff bits after every run of 5 equal bits, starting
    /// with the bit after SOF and ending before the stuff count (CAN FD) or
    /// the CRC delimiter (classical, i.e. including the CRC field).
    ///
    /// Exception: no stuff bit is inserted directly before the stuff count
    /// field, and that suppressed bit does not count. Returns the resulting
    /// stuff count (modulo 8).
    fn insert_normal_stuff_bits(&mut self) -> u8 {
        assert!(
            self.bits.first().map(|b| b.kind()) == Some(BitKind::Sof),
            "frame must start with SOF"
        );

        let mut same_bits = 1;
        let mut prev_value = BitValue::Dominant;
        self.stuff_cnt = 0;

        let mut i = 1;
        while i < self.bits.len() {
            if matches!(self.bits[i].kind(), BitKind::CrcDelim | BitKind::StuffCnt) {
                break;
            }

            if self.bits[i].value() == prev_value {
                same_bits += 1;
            } else {
                same_bits = 1;
            }

            if same_bits == 5 {
                // No regular stuff bit right before the stuff count, and
                // the suppressed one is not counted either.
                if self.bits.get(i + 1).map(|b| b.kind()) == Some(BitKind::StuffCnt) {
                    prev_value = self.bits[i].value();
                    i += 1;
                    continue;
                }

                let stuff = Bit::stuffed(
                    self.bits[i].kind(),
                    self.bits[i].opposite(),
                    *self.flags(),
                    self.nominal,
                    self.data,
                    StuffKind::Normal,
                );
                self.bits.insert(i + 1, stuff);
                i += 1;
                same_bits = 1;
                self.stuff_cnt = (self.stuff_cnt + 1) % 8;
            }

            prev_value = self.bits[i].value();
            i += 1;
        }

        self.stuff_cnt
    }

    /// Writes the Gray-coded stuff count into the stuff-count field.
    ///
    /// A frame already truncated before the field (e.g. by an error-frame
    /// splice) is left alone.
    fn set_stuff_count(&mut self) {
        debug_assert!(self.flags().frame_kind() == FrameKind::CanFd);

        self.stuff_cnt_encoded = gray_encode(self.stuff_cnt);
        let Some(first) = self.find_kind(BitKind::StuffCnt) else {
            warn!("frame has no stuff count field to update");
            return;
        };
        for i in 0..3 {
            let bit = &mut self.bits[first + i];
            assert!(bit.kind() == BitKind::StuffCnt);
            bit.set_value(BitValue::from_lsb(
                (self.stuff_cnt_encoded >> (2 - i)) as u32,
            ));
        }
    }

    /// Writes the parity (XOR) of the encoded stuff count.
    fn set_stuff_parity(&mut self) {
        debug_assert!(self.flags().frame_kind() == FrameKind::CanFd);

        let Some(index) = self.find_kind(BitKind::StuffParity) else {
            return;
        };
        let mut parity = 0u8;
        for i in 0..3 {
            parity ^= (self.stuff_cnt_encoded >> i) & 0x1;
        }
        self.bits[index].set_value(BitValue::from_lsb(parity as u32));
    }

    /// Inserts the fixed stuff bit before the stuff count and the one
    /// between stuff parity and the first CRC bit.
    fn insert_stuff_to_stuff_count(&mut self) {
        debug_assert!(self.flags().frame_kind() == FrameKind::CanFd);

        let Some(sc) = self.find_kind(BitKind::StuffCnt) else {
            return;
        };
        let value = self.bits[sc - 1].opposite();
        let stuff = Bit::stuffed(
            BitKind::StuffCnt,
            value,
            *self.flags(),
            self.nominal,
            self.data,
            StuffKind::Fixed,
        );
        self.bits.insert(sc, stuff);

        // The parity bit now sits 4 positions behind the inserted bit.
        let parity = sc + 4;
        debug_assert!(self.bits[parity].kind() == BitKind::StuffParity);
        let value = self.bits[parity].opposite();
        let stuff = Bit::stuffed(
            BitKind::StuffParity,
            value,
            *self.flags(),
            self.nominal,
            self.data,
            StuffKind::Fixed,
        );
        self.bits.insert(parity + 1, stuff);
    }

    /// Inserts a fixed stuff bit after every 4 bits of the CRC field.
    fn insert_fixed_stuff_to_crc(&mut self) {
        debug_assert!(self.flags().frame_kind() == FrameKind::CanFd);

        let Some(mut i) = self.find_kind(BitKind::Crc) else {
            return;
        };
        let mut crc_bits = 0;
        while self.bits[i].kind() != BitKind::CrcDelim {
            crc_bits += 1;
            if crc_bits % 4 == 0 {
                let stuff = Bit::stuffed(
                    BitKind::Crc,
                    self.bits[i].opposite(),
                    *self.flags(),
                    self.nominal,
                    self.data,
                    StuffKind::Fixed,
                );
                self.bits.insert(i + 1, stuff);
                // Skip the inserted bit so it is not counted itself.
                i += 1;
            }
            i += 1;
        }
    }

    // ===== CRC engine =====

    /// Computes CRC-15, CRC-17 and CRC-21 in one pass over all bits from
    /// SOF up to the CRC field, and returns the one this frame transmits.
    ///
    /// Inclusion rules differ per polynomial: CRC-15 skips every stuff bit,
    /// CRC-17/21 skip only fixed stuff bits.
    fn calc_crc(&mut self) -> u32 {
        self.crc15 = 0;
        self.crc17 = 1 << 16;
        self.crc21 = 1 << 20;

        for bit in &self.bits {
            if bit.kind() == BitKind::Crc {
                break;
            }

            let value = bit.value() as u32;
            let next15 = value ^ ((self.crc15 >> 14) & 0x1);
            let next17 = value ^ ((self.crc17 >> 16) & 0x1);
            let next21 = value ^ ((self.crc21 >> 20) & 0x1);

            if bit.stuff_kind() == StuffKind::NoStuff {
                self.crc15 <<= 1;
            }
            if bit.stuff_kind() != StuffKind::Fixed {
                self.crc17 <<= 1;
                self.crc21 <<= 1;
            }

            self.crc15 &= 0x7FFF;
            self.crc17 &= 0x1FFFF;
            self.crc21 &= 0x1FFFFF;

            if next15 == 1 && bit.stuff_kind() == StuffKind::NoStuff {
                self.crc15 ^= 0xC599;
            }
            if next17 == 1 && bit.stuff_kind() != StuffKind::Fixed {
                self.crc17 ^= 0x3685B;
            }
            if next21 == 1 && bit.stuff_kind() != StuffKind::Fixed {
                self.crc21 ^= 0x302899;
            }
        }

        self.crc()
    }

    /// Writes the computed CRC into the CRC field placeholders, MSB first.
    fn update_crc_bits(&mut self) {
        let Some(first) = self.find_kind(BitKind::Crc) else {
            return;
        };
        let crc = self.crc();
        let mut shift = self.crc_len();

        let mut index = first;
        while index < self.bits.len() && self.bits[index].kind() == BitKind::Crc {
            // Writing the CRC under existing stuff bits would change the
            // value of those stuff bits; the stuffing pipeline prevents it.
            assert!(
                self.bits[index].stuff_kind() == StuffKind::NoStuff,
                "CRC must be written before stuff bits are inserted into it"
            );
            shift -= 1;
            self.bits[index].set_value(BitValue::from_lsb(crc >> shift));
            index += 1;
        }
    }

    // ===== display =====

    /// Per-bit listing with field names, durations and values, for debug
    /// output once a clock period is known.
    pub fn detailed_listing(&self, clock_period: Duration) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>20} {:>15} {:>7}\n",
            "Field", "Duration (ns)", "Value"
        ));
        for bit in &self.bits {
            let duration = clock_period * bit.len_cycles_total() as u32;
            out.push_str(&format!(
                "{:>20} {:>15} {:>7}\n",
                bit.kind().name(),
                duration.as_nanos(),
                bit.value()
            ));
        }
        out
    }
}

/// Renders the classic two-row frame dump: field names above, bit values
/// below, stuff bits included.
impl fmt::Display for BitFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = String::new();
        let mut values = String::new();

        let mut i = 0;
        while i < self.bits.len() {
            names.push(' ');
            values.push('|');

            let kind = self.bits[i].kind();
            if self.bits[i].is_single_bit_field() {
                let mut vals = format!(" {} ", self.bits[i].value());
                i += 1;
                // A stuff bit inserted behind a single-bit field carries
                // the same kind; show it within the same column.
                if i < self.bits.len() && self.bits[i].kind() == kind && self.bits[i].is_stuff_bit()
                {
                    vals.push_str(&format!("{} ", self.bits[i].value()));
                    i += 1;
                }
                let width = vals.len().max(kind.name().len());
                names.push_str(&center(kind.name(), width));
                values.push_str(&pad(&vals, width));
            } else {
                let mut vals = String::from(" ");
                while i < self.bits.len() && self.bits[i].kind() == kind {
                    vals.push_str(&format!("{} ", self.bits[i].value()));
                    i += 1;
                }
                let width = vals.len().max(kind.name().len());
                names.push_str(&center(kind.name(), width));
                values.push_str(&pad(&vals, width));
            }
        }
        values.push('|');

        let ruler = "-".repeat(names.len().max(values.len()));
        writeln!(f, "{}", names)?;
        writeln!(f, "{}", ruler)?;
        writeln!(f, "{}", values)?;
        write!(f, "{}", ruler)
    }
}

fn center(text: &str, width: usize) -> String {
    let pad_total = width.saturating_sub(text.len());
    let pre = pad_total / 2;
    let post = pad_total - pre;
    format!("{}{}{}", " ".repeat(pre), text, " ".repeat(post))
}

fn pad(text: &str, width: usize) -> String {
    let mut out = String::from(text);
    while out.len() < width {
        out.push(' ');
    }
    out
}

/// 3-bit Gray code of the stuff count.
fn gray_encode(count: u8) -> u8 {
    match count {
        0x0 => 0b000,
        0x1 => 0b001,
        0x2 => 0b011,
        0x3 => 0b010,
        0x4 => 0b110,
        0x5 => 0b111,
        0x6 => 0b101,
        0x7 => 0b100,
        _ => unreachable!("stuff count is tracked modulo 8"),
    }
}
