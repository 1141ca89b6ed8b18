// canstim/src/quanta.rs
//
// Time quantum: a phase-tagged run of clock cycles.

//! Time quanta, the granularity of CAN bit timing.
//!
//! A bit consists of one sync quantum followed by the propagation, phase 1
//! and phase 2 segments; each quantum spans `brp` clock cycles. Tests
//! lengthen, shorten or force quanta to model resynchronisation and
//! glitches.

use crate::cycle::Cycle;
use crate::flags::BitValue;

/// Phase of a bit a time quantum belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BitPhase {
    /// Synchronisation segment, always exactly one quantum.
    Sync,
    /// Propagation segment.
    Prop,
    /// Phase segment 1 (ends at the sample point).
    Ph1,
    /// Phase segment 2 (after the sample point).
    Ph2,
}

/// One time quantum: an ordered run of clock cycles tagged with the bit
/// phase it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeQuanta {
    phase: BitPhase,
    cycles: Vec<Cycle>,
}

impl TimeQuanta {
    /// A quantum of `brp` inherited cycles.
    pub fn new(brp: u32, phase: BitPhase) -> Self {
        TimeQuanta {
            phase,
            cycles: vec![Cycle::inherited(); brp as usize],
        }
    }

    /// A quantum of `brp` cycles all forced to `value`.
    pub fn with_value(brp: u32, phase: BitPhase, value: BitValue) -> Self {
        TimeQuanta {
            phase,
            cycles: vec![Cycle::forced(value); brp as usize],
        }
    }

    /// Phase this quantum belongs to.
    pub fn phase(&self) -> BitPhase {
        self.phase
    }

    /// Length in clock cycles.
    pub fn len_cycles(&self) -> usize {
        self.cycles.len()
    }

    /// The cycles of this quantum, in bus order.
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Cycle at `index`.
    ///
    /// Panics when the quantum has fewer cycles; indexing past the end of a
    /// quantum is a test-construction bug.
    pub fn cycle(&self, index: usize) -> &Cycle {
        &self.cycles[index]
    }

    /// Mutable cycle at `index`. Panics like [`cycle`](Self::cycle).
    pub fn cycle_mut(&mut self, index: usize) -> &mut Cycle {
        &mut self.cycles[index]
    }

    /// Whether any cycle carries a forced value.
    pub fn has_forced_cycles(&self) -> bool {
        self.cycles.iter().any(|c| !c.is_inherited())
    }

    /// Appends `by_cycles` inherited cycles.
    pub fn lengthen(&mut self, by_cycles: usize) {
        self.cycles
            .extend(std::iter::repeat(Cycle::inherited()).take(by_cycles));
    }

    /// Appends `by_cycles` cycles forced to `value`.
    pub fn lengthen_with(&mut self, by_cycles: usize, value: BitValue) {
        self.cycles
            .extend(std::iter::repeat(Cycle::forced(value)).take(by_cycles));
    }

    /// Removes up to `by_cycles` cycles from the end.
    pub fn shorten(&mut self, by_cycles: usize) {
        let new_len = self.cycles.len().saturating_sub(by_cycles);
        self.cycles.truncate(new_len);
    }

    /// Forces the cycle at `cycle_index` to `value`.
    ///
    /// Panics when the quantum has fewer cycles.
    pub fn force_cycle(&mut self, cycle_index: usize, value: BitValue) {
        self.cycles[cycle_index].force(value);
    }

    /// Forces every cycle to `value`.
    pub fn force_all(&mut self, value: BitValue) {
        for cycle in &mut self.cycles {
            cycle.force(value);
        }
    }

    /// Releases every forced cycle back to inheriting.
    pub fn release_all(&mut self) {
        for cycle in &mut self.cycles {
            cycle.release();
        }
    }
}
