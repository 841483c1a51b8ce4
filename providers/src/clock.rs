//! Time and randomness sources.

use apollon_types::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

pub trait RandomSource: Send + Sync {
    /// Uniform value in `0..bound` (0 when `bound` is 0).
    fn next_below(&self, bound: u64) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn next_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        rand::random::<u64>() % bound
    }
}
