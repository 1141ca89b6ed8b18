// canstim/src/rng.rs
//
// Deterministic randomisation support.

//! Seeded randomisation for reproducible tests.
//!
//! Every randomising operation in this crate takes `&mut impl Rng`
//! explicitly; there is no hidden global generator. The test controller
//! seeds one generator per test run and threads it through, so a failing
//! test reproduces bit-for-bit from its logged seed.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// The generator type used by the test framework.
pub type TestRng = StdRng;

/// A generator seeded from the test controller's seed value.
///
/// The same seed always yields the same frame stream.
pub fn seeded_rng(seed: u64) -> TestRng {
    StdRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = seeded_rng(0xDEAD_BEEF);
        let mut b = seeded_rng(0xDEAD_BEEF);

        for _ in 0..32 {
            let mut fa = Frame::any();
            let mut fb = Frame::any();
            fa.randomize(&mut a);
            fb.randomize(&mut b);
            assert_eq!(fa, fb);
        }
    }

    #[test]
    fn test_different_seed_diverges() {
        let mut a = seeded_rng(1);
        let mut b = seeded_rng(2);

        let mut any_difference = false;
        for _ in 0..32 {
            let mut fa = Frame::any();
            let mut fb = Frame::any();
            fa.randomize(&mut a);
            fb.randomize(&mut b);
            any_difference |= fa != fb;
        }
        assert!(any_difference);
    }
}
