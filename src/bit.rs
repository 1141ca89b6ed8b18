// canstim/src/bit.rs
//
// One bit on the CAN bus, down to its time quanta.

//! A single bit of a frame as it appears on the wire.
//!
//! Every [`Bit`] knows which frame field it belongs to, its line value,
//! whether it is a stuff bit, and owns the ordered time quanta that make up
//! its duration. Because a CAN FD frame can switch bit rate mid-frame, each
//! bit resolves per phase which of the two timing configurations applies;
//! the quanta are built accordingly and rebuilt when tests reshape the bit.

use crate::cycle::Cycle;
use crate::flags::{BitValue, BrsFlag, FrameFlags, FrameKind};
use crate::quanta::{BitPhase, TimeQuanta};
use crate::timing::{BitRate, BitTiming};
use log::debug;
use std::fmt;

/// Frame field a bit belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitKind {
    /// Start of frame.
    Sof,
    /// Base (11-bit) identifier.
    BaseIdent,
    /// Identifier extension (lower 18 bits).
    ExtIdent,
    /// Remote transmission request.
    Rtr,
    /// Identifier extension flag.
    Ide,
    /// Substitute remote request.
    Srr,
    /// Extended data length (FDF).
    Edl,
    /// Reserved bit r0.
    R0,
    /// Reserved bit r1.
    R1,
    /// Bit-rate switch.
    Brs,
    /// Error state indicator.
    Esi,
    /// Data length code.
    Dlc,
    /// Data field.
    Data,
    /// Stuff count (CAN FD).
    StuffCnt,
    /// Stuff count parity (CAN FD).
    StuffParity,
    /// CRC sequence.
    Crc,
    /// CRC delimiter.
    CrcDelim,
    /// Acknowledge slot.
    Ack,
    /// Acknowledge delimiter.
    AckDelim,
    /// End of frame.
    Eof,
    /// Intermission.
    Interm,
    /// Bus idle.
    Idle,
    /// Suspend transmission.
    SuspTrans,
    /// Active error flag.
    ActErrFlag,
    /// Passive error flag.
    PasErrFlag,
    /// Error delimiter.
    ErrDelim,
    /// Overload flag.
    OvrlFlag,
    /// Overload delimiter.
    OvrlDelim,
}

impl BitKind {
    /// Human-readable field name, used in frame dumps and driver/monitor
    /// item messages.
    pub fn name(self) -> &'static str {
        match self {
            BitKind::Sof => "SOF",
            BitKind::BaseIdent => "Base identifier",
            BitKind::ExtIdent => "Extended identifier",
            BitKind::Rtr => "RTR",
            BitKind::Ide => "IDE",
            BitKind::Srr => "SRR",
            BitKind::Edl => "EDL",
            BitKind::R0 => "R0",
            BitKind::R1 => "R1",
            BitKind::Brs => "BRS",
            BitKind::Esi => "ESI",
            BitKind::Dlc => "DLC",
            BitKind::Data => "Data field",
            BitKind::StuffCnt => "Stuff count",
            BitKind::StuffParity => "Stuff parity",
            BitKind::Crc => "CRC",
            BitKind::CrcDelim => "CRC delimiter",
            BitKind::Ack => "ACK",
            BitKind::AckDelim => "ACK delimiter",
            BitKind::Eof => "End of frame",
            BitKind::Interm => "Intermission",
            BitKind::Idle => "Idle",
            BitKind::SuspTrans => "Suspend",
            BitKind::ActErrFlag => "Active error flag",
            BitKind::PasErrFlag => "Passive error flag",
            BitKind::ErrDelim => "Error delimiter",
            BitKind::OvrlFlag => "Overload flag",
            BitKind::OvrlDelim => "Overload delimiter",
        }
    }
}

impl fmt::Display for BitKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether a bit was inserted by one of the stuffing rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StuffKind {
    /// A regular frame bit.
    NoStuff,
    /// Inserted by the run-length rule (after 5 equal bits).
    Normal,
    /// Inserted at a fixed position of the CAN FD CRC region.
    Fixed,
}

/// The canonical phase order within a bit.
const BIT_PHASES: [BitPhase; 4] = [BitPhase::Sync, BitPhase::Prop, BitPhase::Ph1, BitPhase::Ph2];

/// One bit on the CAN bus.
///
/// The bit carries by value the context it needs to resolve timing on its
/// own: the frame-shape flags and both bit-timing configurations. The sync
/// quantum always exists; the other phases may be shortened away entirely by
/// a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bit {
    kind: BitKind,
    value: BitValue,
    stuff_kind: StuffKind,
    flags: FrameFlags,
    nominal: BitTiming,
    data: BitTiming,
    quanta: Vec<TimeQuanta>,
}

impl Bit {
    /// A regular (non-stuff) bit.
    pub fn new(
        kind: BitKind,
        value: BitValue,
        flags: FrameFlags,
        nominal: BitTiming,
        data: BitTiming,
    ) -> Self {
        Bit::stuffed(kind, value, flags, nominal, data, StuffKind::NoStuff)
    }

    /// A bit with an explicit stuff kind.
    pub fn stuffed(
        kind: BitKind,
        value: BitValue,
        flags: FrameFlags,
        nominal: BitTiming,
        data: BitTiming,
        stuff_kind: StuffKind,
    ) -> Self {
        let mut bit = Bit {
            kind,
            value,
            stuff_kind,
            flags,
            nominal,
            data,
            quanta: Vec::new(),
        };
        bit.construct_quanta();
        bit
    }

    /// Frame field this bit belongs to.
    pub fn kind(&self) -> BitKind {
        self.kind
    }

    /// Current line value.
    pub fn value(&self) -> BitValue {
        self.value
    }

    /// Sets the line value.
    pub fn set_value(&mut self, value: BitValue) {
        self.value = value;
    }

    /// Stuff kind of this bit.
    pub fn stuff_kind(&self) -> StuffKind {
        self.stuff_kind
    }

    /// Inverts the line value.
    pub fn flip(&mut self) {
        self.value = self.value.opposite();
    }

    /// The opposite of the current line value.
    pub fn opposite(&self) -> BitValue {
        self.value.opposite()
    }

    /// True for normal and fixed stuff bits.
    pub fn is_stuff_bit(&self) -> bool {
        self.stuff_kind != StuffKind::NoStuff
    }

    /// True when the bit's field occupies a single bit on the bus (SOF,
    /// IDE, EDL, ...), false for multi-bit fields like data or CRC.
    pub fn is_single_bit_field(&self) -> bool {
        matches!(
            self.kind,
            BitKind::Sof
                | BitKind::R0
                | BitKind::R1
                | BitKind::Srr
                | BitKind::Rtr
                | BitKind::Ide
                | BitKind::Edl
                | BitKind::Brs
                | BitKind::Esi
                | BitKind::CrcDelim
                | BitKind::StuffParity
                | BitKind::Ack
                | BitKind::AckDelim
        )
    }

    /// The time quanta of this bit, in bus order.
    pub fn quanta(&self) -> &[TimeQuanta] {
        &self.quanta
    }

    /// Whether any quantum of `phase` is present.
    pub fn has_phase(&self, phase: BitPhase) -> bool {
        self.quanta.iter().any(|tq| tq.phase() == phase)
    }

    /// Whether any cycle of the bit carries a forced value.
    pub fn has_forced_cycles(&self) -> bool {
        self.quanta.iter().any(|tq| tq.has_forced_cycles())
    }

    /// Number of time quanta in `phase`.
    pub fn len_tq(&self, phase: BitPhase) -> usize {
        self.quanta.iter().filter(|tq| tq.phase() == phase).count()
    }

    /// Number of clock cycles in `phase`.
    pub fn len_cycles(&self, phase: BitPhase) -> usize {
        self.quanta
            .iter()
            .filter(|tq| tq.phase() == phase)
            .map(|tq| tq.len_cycles())
            .sum()
    }

    /// Total number of time quanta.
    pub fn len_tq_total(&self) -> usize {
        self.quanta.len()
    }

    /// Total number of clock cycles.
    pub fn len_cycles_total(&self) -> usize {
        self.quanta.iter().map(|tq| tq.len_cycles()).sum()
    }

    /// Quantum at `index` within the bit.
    ///
    /// Panics when the bit has fewer quanta.
    pub fn quantum(&self, index: usize) -> &TimeQuanta {
        assert!(index < self.quanta.len(), "bit has no time quantum {}", index);
        &self.quanta[index]
    }

    /// Mutable quantum at `index`. Panics like [`quantum`](Self::quantum).
    pub fn quantum_mut(&mut self, index: usize) -> &mut TimeQuanta {
        assert!(index < self.quanta.len(), "bit has no time quantum {}", index);
        &mut self.quanta[index]
    }

    /// Quantum at `index` within `phase`.
    ///
    /// Panics when the phase is absent or shorter than `index`.
    pub fn quantum_in_phase(&self, phase: BitPhase, index: usize) -> &TimeQuanta {
        let (start, len) = self
            .phase_span(phase)
            .expect("bit phase does not exist");
        assert!(index < len, "bit phase has no time quantum {}", index);
        &self.quanta[start + index]
    }

    /// Mutable variant of [`quantum_in_phase`](Self::quantum_in_phase).
    pub fn quantum_in_phase_mut(&mut self, phase: BitPhase, index: usize) -> &mut TimeQuanta {
        let (start, len) = self
            .phase_span(phase)
            .expect("bit phase does not exist");
        assert!(index < len, "bit phase has no time quantum {}", index);
        &mut self.quanta[start + index]
    }

    /// Cycle at a flat index counted across all quanta of the bit.
    pub fn cycle(&self, index: usize) -> &Cycle {
        let mut remaining = index;
        for tq in &self.quanta {
            if remaining < tq.len_cycles() {
                return tq.cycle(remaining);
            }
            remaining -= tq.len_cycles();
        }
        panic!("bit has no cycle {}", index);
    }

    /// Mutable variant of [`cycle`](Self::cycle).
    pub fn cycle_mut(&mut self, index: usize) -> &mut Cycle {
        let mut remaining = index;
        for tq in &mut self.quanta {
            if remaining < tq.len_cycles() {
                return tq.cycle_mut(remaining);
            }
            remaining -= tq.len_cycles();
        }
        panic!("bit has no cycle {}", index);
    }

    /// Removes up to `count` quanta from the end of `phase` and returns how
    /// many were actually removed. A missing phase is a no-op.
    pub fn shorten_phase(&mut self, phase: BitPhase, count: usize) -> usize {
        let Some((start, len)) = self.phase_span(phase) else {
            return 0;
        };
        let removed = count.min(len);
        self.quanta.drain(start + len - removed..start + len);
        removed
    }

    /// Inserts `count` new quanta of `phase`, at the position the canonical
    /// Sync < Prop < Ph1 < Ph2 order implies. A phase shortened to zero can
    /// be grown back this way.
    pub fn lengthen_phase(&mut self, phase: BitPhase, count: usize) {
        let timing = self.phase_timing(phase);
        let at = self
            .quanta
            .iter()
            .filter(|tq| tq.phase() <= phase)
            .count();
        for _ in 0..count {
            self.quanta.insert(at, TimeQuanta::new(timing.brp, phase));
        }
    }

    /// Forces all cycles of the quantum at `index` to `value`. Returns false
    /// when the bit has fewer quanta.
    pub fn force_tq(&mut self, index: usize, value: BitValue) -> bool {
        if index >= self.quanta.len() {
            return false;
        }
        self.quanta[index].force_all(value);
        true
    }

    /// Forces the quanta in the inclusive range `start..=end` to `value`;
    /// the end is clamped to the bit length. Returns the number of quanta
    /// forced.
    pub fn force_tq_range(&mut self, start: usize, end: usize, value: BitValue) -> usize {
        if start >= self.quanta.len() || start > end {
            return 0;
        }
        let end = end.min(self.quanta.len() - 1);
        for tq in &mut self.quanta[start..=end] {
            tq.force_all(value);
        }
        end - start + 1
    }

    /// Forces the quantum at `index` within `phase` to `value`. Returns
    /// false when the phase is absent or shorter.
    pub fn force_tq_in_phase(&mut self, index: usize, phase: BitPhase, value: BitValue) -> bool {
        match self.phase_span(phase) {
            Some((start, len)) if index < len => {
                self.quanta[start + index].force_all(value);
                true
            }
            _ => false,
        }
    }

    /// Forces the inclusive quantum range `start..=end` within `phase` to
    /// `value`, clamping at the phase end. Returns the number of quanta
    /// forced.
    pub fn force_tq_range_in_phase(
        &mut self,
        start: usize,
        end: usize,
        phase: BitPhase,
        value: BitValue,
    ) -> usize {
        let Some((phase_start, len)) = self.phase_span(phase) else {
            return 0;
        };
        if start >= len || start > end {
            return 0;
        }
        let end = end.min(len - 1);
        for tq in &mut self.quanta[phase_start + start..=phase_start + end] {
            tq.force_all(value);
        }
        end - start + 1
    }

    /// The closest present phase before `phase`. Sync always exists, so the
    /// search terminates there.
    pub fn prev_phase(&self, phase: BitPhase) -> BitPhase {
        let rank = BIT_PHASES.iter().position(|&p| p == phase).unwrap();
        for &candidate in BIT_PHASES[..rank].iter().rev() {
            if self.has_phase(candidate) {
                return candidate;
            }
        }
        debug_assert!(self.has_phase(BitPhase::Sync), "bit without a sync phase");
        BitPhase::Sync
    }

    /// The closest present phase after `phase`, or `phase` itself when it is
    /// the last one present.
    pub fn next_phase(&self, phase: BitPhase) -> BitPhase {
        let rank = BIT_PHASES.iter().position(|&p| p == phase).unwrap();
        for &candidate in &BIT_PHASES[rank + 1..] {
            if self.has_phase(candidate) {
                return candidate;
            }
        }
        phase
    }

    /// Which bit rate `phase` of this bit runs at.
    ///
    /// Only CAN FD frames that actually shift switch away from nominal: the
    /// shift happens inside BRS (at the sample point) and shifts back inside
    /// the CRC delimiter, so those two bits straddle both rates.
    pub fn phase_rate(&self, phase: BitPhase) -> BitRate {
        if self.flags.frame_kind() == FrameKind::CanFd && self.flags.brs() == BrsFlag::Shift {
            match self.kind {
                BitKind::Brs => {
                    if phase == BitPhase::Ph2 {
                        return BitRate::Data;
                    }
                    return BitRate::Nominal;
                }
                BitKind::CrcDelim => {
                    if phase == BitPhase::Ph2 {
                        return BitRate::Nominal;
                    }
                    return BitRate::Data;
                }
                BitKind::Esi
                | BitKind::Dlc
                | BitKind::Data
                | BitKind::StuffCnt
                | BitKind::StuffParity
                | BitKind::Crc => return BitRate::Data,
                _ => {}
            }
        }
        BitRate::Nominal
    }

    /// The bit-timing configuration `phase` of this bit runs at.
    pub fn phase_timing(&self, phase: BitPhase) -> BitTiming {
        match self.phase_rate(phase) {
            BitRate::Nominal => self.nominal,
            BitRate::Data => self.data,
        }
    }

    /// Rebuilds phase 2 from the nominal configuration.
    ///
    /// A controller that transmits an error frame resynchronises to the
    /// nominal bit rate at the preceding sample point, so when an error
    /// frame is spliced right after a bit whose phase 2 ran at the data
    /// rate, that phase 2 must be re-timed before the splice.
    pub fn correct_ph2_to_nominal(&mut self) {
        if self.phase_rate(BitPhase::Ph2) != BitRate::Data {
            return;
        }
        debug!(
            "re-timing phase 2 of {} bit to nominal ({} -> {} cycles per bit)",
            self.kind,
            self.len_cycles_total(),
            self.len_cycles_total() - self.len_cycles(BitPhase::Ph2)
                + (self.nominal.ph2 * self.nominal.brp) as usize,
        );

        self.quanta.retain(|tq| tq.phase() != BitPhase::Ph2);
        for _ in 0..self.nominal.ph2 {
            self.quanta
                .push(TimeQuanta::new(self.nominal.brp, BitPhase::Ph2));
        }
    }

    /// Contiguous span of `phase` as `(start index, length)`.
    fn phase_span(&self, phase: BitPhase) -> Option<(usize, usize)> {
        let start = self.quanta.iter().position(|tq| tq.phase() == phase)?;
        let len = self.quanta[start..]
            .iter()
            .take_while(|tq| tq.phase() == phase)
            .count();
        Some((start, len))
    }

    /// Builds the quanta from the timing configurations. Tseg1 (sync, prop,
    /// ph1) shares one bit rate; only ph2 can differ, inside the two bits
    /// that straddle a rate switch.
    fn construct_quanta(&mut self) {
        let tseg1 = self.phase_timing(BitPhase::Ph1);
        let tseg2 = self.phase_timing(BitPhase::Ph2);

        self.quanta.clear();
        self.quanta.push(TimeQuanta::new(tseg1.brp, BitPhase::Sync));
        for _ in 0..tseg1.prop {
            self.quanta.push(TimeQuanta::new(tseg1.brp, BitPhase::Prop));
        }
        for _ in 0..tseg1.ph1 {
            self.quanta.push(TimeQuanta::new(tseg1.brp, BitPhase::Ph1));
        }
        for _ in 0..tseg2.ph2 {
            self.quanta.push(TimeQuanta::new(tseg2.brp, BitPhase::Ph2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{EsiFlag, IdentKind, RtrFlag};

    fn fd_shift_flags() -> FrameFlags {
        FrameFlags::new(
            FrameKind::CanFd,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::Shift,
            EsiFlag::ErrorActive,
        )
    }

    fn nominal() -> BitTiming {
        BitTiming::new(4, 3, 3, 3, 2).unwrap()
    }

    fn data_timing() -> BitTiming {
        BitTiming::new(2, 1, 1, 1, 1).unwrap()
    }

    fn nominal_bit(kind: BitKind, value: BitValue) -> Bit {
        Bit::new(kind, value, fd_shift_flags(), nominal(), data_timing())
    }

    #[test]
    fn test_default_shape() {
        let bit = nominal_bit(BitKind::Sof, BitValue::Dominant);
        assert_eq!(bit.len_tq(BitPhase::Sync), 1);
        assert_eq!(bit.len_tq(BitPhase::Prop), 3);
        assert_eq!(bit.len_tq(BitPhase::Ph1), 3);
        assert_eq!(bit.len_tq(BitPhase::Ph2), 3);
        assert_eq!(bit.len_tq_total(), 10);
        assert_eq!(bit.len_cycles_total(), 40);
    }

    #[test]
    fn test_data_rate_bit_uses_data_timing() {
        let bit = nominal_bit(BitKind::Data, BitValue::Recessive);
        // 1 + 1 + 1 + 1 quanta of 2 cycles each.
        assert_eq!(bit.len_tq_total(), 4);
        assert_eq!(bit.len_cycles_total(), 8);
    }

    #[test]
    fn test_brs_straddles_rates() {
        let bit = nominal_bit(BitKind::Brs, BitValue::Recessive);
        assert_eq!(bit.phase_rate(BitPhase::Sync), BitRate::Nominal);
        assert_eq!(bit.phase_rate(BitPhase::Ph1), BitRate::Nominal);
        assert_eq!(bit.phase_rate(BitPhase::Ph2), BitRate::Data);
        // Tseg1 at nominal (7 quanta x 4 cycles), ph2 at data (1 quantum x 2).
        assert_eq!(bit.len_cycles_total(), 30);

        let bit = nominal_bit(BitKind::CrcDelim, BitValue::Recessive);
        assert_eq!(bit.phase_rate(BitPhase::Ph1), BitRate::Data);
        assert_eq!(bit.phase_rate(BitPhase::Ph2), BitRate::Nominal);
        // Tseg1 at data (3 quanta x 2 cycles), ph2 at nominal (3 x 4).
        assert_eq!(bit.len_cycles_total(), 18);
    }

    #[test]
    fn test_no_shift_everything_nominal() {
        let flags = FrameFlags::new(
            FrameKind::CanFd,
            IdentKind::Base,
            RtrFlag::DataFrame,
            BrsFlag::DontShift,
            EsiFlag::ErrorActive,
        );
        let bit = Bit::new(
            BitKind::Data,
            BitValue::Dominant,
            flags,
            nominal(),
            data_timing(),
        );
        assert_eq!(bit.phase_rate(BitPhase::Ph2), BitRate::Nominal);
        assert_eq!(bit.len_cycles_total(), 40);
    }

    #[test]
    fn test_shorten_lengthen_roundtrip() {
        let mut bit = nominal_bit(BitKind::Sof, BitValue::Dominant);

        assert_eq!(bit.shorten_phase(BitPhase::Ph1, 2), 2);
        assert_eq!(bit.len_tq(BitPhase::Ph1), 1);

        // Over-shortening clamps and reports what it removed.
        assert_eq!(bit.shorten_phase(BitPhase::Ph1, 5), 1);
        assert!(!bit.has_phase(BitPhase::Ph1));
        assert_eq!(bit.shorten_phase(BitPhase::Ph1, 1), 0);

        bit.lengthen_phase(BitPhase::Ph1, 3);
        assert_eq!(bit.len_tq(BitPhase::Ph1), 3);
        assert_eq!(bit.len_tq_total(), 10);

        // Quanta of the regrown phase land between prop and ph2.
        let phases: Vec<BitPhase> = bit.quanta().iter().map(|tq| tq.phase()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
    }

    #[test]
    fn test_phase_neighbours_skip_missing() {
        let mut bit = nominal_bit(BitKind::Sof, BitValue::Dominant);
        bit.shorten_phase(BitPhase::Prop, 3);
        bit.shorten_phase(BitPhase::Ph1, 3);

        assert_eq!(bit.prev_phase(BitPhase::Ph2), BitPhase::Sync);
        assert_eq!(bit.next_phase(BitPhase::Sync), BitPhase::Ph2);
        assert_eq!(bit.next_phase(BitPhase::Ph2), BitPhase::Ph2);
    }

    #[test]
    fn test_force_ranges() {
        let mut bit = nominal_bit(BitKind::Sof, BitValue::Recessive);

        assert!(bit.force_tq(0, BitValue::Dominant));
        assert!(!bit.force_tq(100, BitValue::Dominant));

        // End clamps at the last quantum.
        assert_eq!(bit.force_tq_range(8, 100, BitValue::Dominant), 2);
        assert!(bit.quantum(9).has_forced_cycles());

        assert!(bit.force_tq_in_phase(2, BitPhase::Ph1, BitValue::Dominant));
        assert!(!bit.force_tq_in_phase(3, BitPhase::Ph1, BitValue::Dominant));
        assert_eq!(
            bit.force_tq_range_in_phase(1, 2, BitPhase::Prop, BitValue::Dominant),
            2
        );
    }

    #[test]
    fn test_ph2_retiming() {
        let mut bit = nominal_bit(BitKind::Data, BitValue::Dominant);
        assert_eq!(bit.len_cycles(BitPhase::Ph2), 2);

        bit.correct_ph2_to_nominal();
        // Data-rate ph2 (1 quantum x 2 cycles) became nominal (3 x 4).
        assert_eq!(bit.len_tq(BitPhase::Ph2), 3);
        assert_eq!(bit.len_cycles(BitPhase::Ph2), 12);

        // A bit already at nominal is left alone.
        let mut bit = nominal_bit(BitKind::Eof, BitValue::Recessive);
        let before = bit.len_cycles_total();
        bit.correct_ph2_to_nominal();
        assert_eq!(bit.len_cycles_total(), before);
    }

    #[test]
    fn test_flat_cycle_indexing() {
        let mut bit = nominal_bit(BitKind::Ack, BitValue::Recessive);
        bit.cycle_mut(5).force(BitValue::Dominant);
        assert!(!bit.cycle(5).is_inherited());
        assert!(bit.cycle(4).is_inherited());
        // Cycle 5 falls into the second quantum (4 cycles per quantum).
        assert!(bit.quantum(1).has_forced_cycles());
    }

    #[test]
    fn test_single_bit_field_table() {
        let single = nominal_bit(BitKind::Ide, BitValue::Dominant);
        assert!(single.is_single_bit_field());
        let multi = nominal_bit(BitKind::Crc, BitValue::Dominant);
        assert!(!multi.is_single_bit_field());
    }
}
