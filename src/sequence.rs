// canstim/src/sequence.rs
//
// Serialises bit frames into driver and monitor item streams.

//! Two-stream serialisation of bit frames for the test bench.
//!
//! A [`TestSequence`] walks one or two [`BitFrame`]s and produces the flat
//! item lists the simulator agent consumes: driver items are driven onto
//! the DUT's RX pin, monitor items are checked against its TX pin. Driver
//! items coalesce runs of cycles with equal effective value; monitor items
//! are emitted per bit, split in two where a bit straddles a bit-rate
//! change so each part carries the right sample period.

use crate::bit::{Bit, BitKind};
use crate::bit_frame::BitFrame;
use crate::flags::BitValue;
use crate::pli::PliBridge;
use crate::quanta::BitPhase;
use std::time::Duration;

/// One item driven onto the DUT's RX pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverItem {
    /// How long the value is driven.
    pub duration: Duration,
    /// The line value to drive.
    pub value: BitValue,
    /// Message printed by the simulator when driving starts.
    pub message: Option<String>,
}

impl DriverItem {
    /// Whether the item carries a simulator message.
    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }
}

/// One item checked against the DUT's TX pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorItem {
    /// How long the value is monitored.
    pub duration: Duration,
    /// How often the monitor samples the pin during this item.
    pub sample_period: Duration,
    /// The line value expected.
    pub value: BitValue,
    /// Message printed by the simulator when monitoring starts.
    pub message: Option<String>,
}

impl MonitorItem {
    /// Whether the item carries a simulator message.
    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }
}

/// Driver and monitor item streams for one elementary test.
///
/// ```
/// use canstim::{BitFrame, BitTiming, Frame, FrameFlags, FrameKind, TestSequence};
/// use std::time::Duration;
///
/// let flags = FrameFlags::any().with_kind(FrameKind::Can20);
/// let frame = Frame::with_data(flags, 0, 0x733, &[]).unwrap();
/// let bf = BitFrame::new(frame, BitTiming::default(), BitTiming::default());
///
/// let seq = TestSequence::with_frames(Duration::from_nanos(10), &bf, &bf);
/// assert!(!seq.driver_items().is_empty());
/// assert!(!seq.monitor_items().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct TestSequence {
    clock_period: Duration,
    driver_items: Vec<DriverItem>,
    monitor_items: Vec<MonitorItem>,
}

impl TestSequence {
    /// An empty sequence with the given DUT clock period.
    pub fn new(clock_period: Duration) -> Self {
        TestSequence {
            clock_period,
            driver_items: Vec::new(),
            monitor_items: Vec::new(),
        }
    }

    /// A sequence with only a driver stream.
    pub fn driver_only(clock_period: Duration, frame: &BitFrame) -> Self {
        let mut seq = TestSequence::new(clock_period);
        seq.append_driver_frame(frame);
        seq
    }

    /// A sequence with only a monitor stream.
    pub fn monitor_only(clock_period: Duration, frame: &BitFrame) -> Self {
        let mut seq = TestSequence::new(clock_period);
        seq.append_monitor_frame(frame);
        seq
    }

    /// A sequence with both streams, usually built from two views of the
    /// same frame (what the test drives vs. what the DUT must transmit).
    pub fn with_frames(
        clock_period: Duration,
        driver_frame: &BitFrame,
        monitor_frame: &BitFrame,
    ) -> Self {
        let mut seq = TestSequence::new(clock_period);
        seq.append_monitor_frame(monitor_frame);
        seq.append_driver_frame(driver_frame);
        seq
    }

    /// Configured DUT clock period.
    pub fn clock_period(&self) -> Duration {
        self.clock_period
    }

    /// The driver stream.
    pub fn driver_items(&self) -> &[DriverItem] {
        &self.driver_items
    }

    /// The monitor stream.
    pub fn monitor_items(&self) -> &[MonitorItem] {
        &self.monitor_items
    }

    /// Appends a hand-built item to the driver stream, e.g. an idle gap
    /// between two frames.
    pub fn append_driver_item(&mut self, item: DriverItem) {
        self.driver_items.push(item);
    }

    /// Appends a hand-built item to the monitor stream.
    pub fn append_monitor_item(&mut self, item: MonitorItem) {
        self.monitor_items.push(item);
    }

    /// Appends every bit of `frame` to the driver stream.
    pub fn append_driver_frame(&mut self, frame: &BitFrame) {
        for bit in frame.bits() {
            self.append_driver_bit(bit);
        }
    }

    /// Appends every bit of `frame` to the monitor stream.
    ///
    /// Most bits become one item. A bit straddling a bit-rate change (BRS,
    /// the CRC delimiter, or the last bit before a spliced error flag)
    /// becomes two, so tseg1 and tseg2 each carry their own sample period.
    pub fn append_monitor_frame(&mut self, frame: &BitFrame) {
        let bits = frame.bits();
        for (i, bit) in bits.iter().enumerate() {
            let next_kind = bits.get(i + 1).map(|b| b.kind());
            let straddles = matches!(bit.kind(), BitKind::Brs | BitKind::CrcDelim)
                || matches!(
                    next_kind,
                    Some(BitKind::ActErrFlag) | Some(BitKind::PasErrFlag)
                );

            if straddles {
                self.append_monitor_bit_with_shift(bit);
            } else {
                self.append_monitor_bit_no_shift(bit);
            }
        }
    }

    /// Converts one bit into driver items, coalescing consecutive cycles of
    /// equal effective value. Every emitted item has non-zero duration: a
    /// bit whose first cycle is forced away from its inherited value starts
    /// the first item at that cycle.
    fn append_driver_bit(&mut self, bit: &Bit) {
        let bit_value = bit.value();
        let mut last_value = bit_value;
        let mut cycles_in_item = 0u32;

        for tq in bit.quanta() {
            for cycle in tq.cycles() {
                let current = cycle.effective(bit_value);

                // A forced value equal to the inherited one merges into the
                // running item.
                if current == last_value {
                    cycles_in_item += 1;
                } else {
                    if cycles_in_item > 0 {
                        self.push_driver_item(cycles_in_item, last_value, bit.kind());
                    }
                    last_value = current;
                    cycles_in_item = 1;
                }
            }
        }

        if cycles_in_item > 0 {
            self.push_driver_item(cycles_in_item, last_value, bit.kind());
        }
    }

    /// Converts a rate-straddling bit into up to two monitor items, one per
    /// bit-rate segment. Zero-length segments are omitted.
    fn append_monitor_bit_with_shift(&mut self, bit: &Bit) {
        let tseg1_cycles: usize = bit
            .quanta()
            .iter()
            .filter(|tq| tq.phase() != BitPhase::Ph2)
            .map(|tq| tq.len_cycles())
            .sum();
        let tseg2_cycles = bit.len_cycles(BitPhase::Ph2);

        if tseg1_cycles > 0 {
            let brp = bit.quantum(0).len_cycles() as u32;
            self.push_monitor_item(tseg1_cycles as u32, brp, bit.value(), bit.kind());
        }

        if tseg2_cycles > 0 {
            let brp = bit.quantum_in_phase(BitPhase::Ph2, 0).len_cycles() as u32;
            self.push_monitor_item(tseg2_cycles as u32, brp, bit.value(), bit.kind());
        }
    }

    /// Converts a bit without a rate change into a single monitor item.
    fn append_monitor_bit_no_shift(&mut self, bit: &Bit) {
        let cycles = bit.len_cycles_total();
        if cycles == 0 {
            return;
        }
        // The first quantum's length doubles as the BRP of the whole bit.
        let brp = bit.quantum(0).len_cycles() as u32;
        self.push_monitor_item(cycles as u32, brp, bit.value(), bit.kind());
    }

    fn push_driver_item(&mut self, cycles: u32, value: BitValue, kind: BitKind) {
        self.driver_items.push(DriverItem {
            duration: self.clock_period * cycles,
            value,
            message: Some(kind.name().to_string()),
        });
    }

    fn push_monitor_item(&mut self, cycles: u32, brp_cycles: u32, value: BitValue, kind: BitKind) {
        self.monitor_items.push(MonitorItem {
            duration: self.clock_period * cycles,
            sample_period: self.clock_period * brp_cycles,
            value,
            message: Some(kind.name().to_string()),
        });
    }

    /// Copies the driver stream into the simulator agent's driver FIFO.
    ///
    /// Flushing the FIFO first is the caller's business.
    pub fn push_driver_items<B: PliBridge + ?Sized>(&self, bridge: &mut B) {
        for item in &self.driver_items {
            bridge.driver_push_item(item.value, item.duration, item.message.as_deref());
        }
    }

    /// Copies the monitor stream into the simulator agent's monitor FIFO.
    pub fn push_monitor_items<B: PliBridge + ?Sized>(&self, bridge: &mut B) {
        for item in &self.monitor_items {
            bridge.monitor_push_item(
                item.value,
                item.duration,
                item.sample_period,
                item.message.as_deref(),
            );
        }
    }
}
