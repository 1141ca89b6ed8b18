// canstim/src/cycle.rs
//
// Per-clock-cycle sample value.

//! One clock-cycle sample on the bus.
//!
//! A cycle normally inherits the value of the bit it belongs to, so flipping
//! a bit retroactively changes every cycle inside it. A test that wants a
//! glitch narrower than a bit forces individual cycles instead; a forced
//! cycle keeps its own value until released.

use crate::flags::BitValue;

/// Value of a single clock cycle within a time quantum.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cycle {
    value: Option<BitValue>,
}

impl Cycle {
    /// A cycle that inherits its value from the owning bit.
    pub fn inherited() -> Self {
        Cycle { value: None }
    }

    /// A cycle forced to `value` from the start.
    pub fn forced(value: BitValue) -> Self {
        Cycle { value: Some(value) }
    }

    /// Whether the cycle still follows the owning bit.
    pub fn is_inherited(&self) -> bool {
        self.value.is_none()
    }

    /// The forced value, if any.
    pub fn forced_value(&self) -> Option<BitValue> {
        self.value
    }

    /// Forces the cycle to `value`.
    pub fn force(&mut self, value: BitValue) {
        self.value = Some(value);
    }

    /// Releases a forced value; the cycle inherits again.
    pub fn release(&mut self) {
        self.value = None;
    }

    /// The value seen on the bus during this cycle, given the value of the
    /// owning bit.
    pub fn effective(&self, bit_value: BitValue) -> BitValue {
        self.value.unwrap_or(bit_value)
    }
}

impl Default for Cycle {
    fn default() -> Self {
        Cycle::inherited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_release() {
        let mut cycle = Cycle::inherited();
        assert!(cycle.is_inherited());
        assert_eq!(cycle.effective(BitValue::Recessive), BitValue::Recessive);

        cycle.force(BitValue::Dominant);
        assert!(!cycle.is_inherited());
        assert_eq!(cycle.effective(BitValue::Recessive), BitValue::Dominant);

        cycle.release();
        assert!(cycle.is_inherited());
        assert_eq!(cycle.effective(BitValue::Dominant), BitValue::Dominant);
    }
}
