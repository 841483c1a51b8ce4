//! Nullable random: deterministic random number generation.

use apollon_providers::RandomSource;
use std::sync::Mutex;

/// Returns pre-configured values in order, cycling when exhausted.
pub struct NullRandom {
    outputs: Mutex<Vec<u64>>,
    index: Mutex<usize>,
}

impl NullRandom {
    /// Create with a sequence of deterministic values.
    pub fn new(outputs: Vec<u64>) -> Self {
        Self {
            outputs: Mutex::new(outputs),
            index: Mutex::new(0),
        }
    }

    /// Create with a single value that will be returned for every call.
    pub fn constant(value: u64) -> Self {
        Self::new(vec![value])
    }
}

impl Default for NullRandom {
    fn default() -> Self {
        Self::constant(0)
    }
}

impl RandomSource for NullRandom {
    fn next_below(&self, bound: u64) -> u64 {
        let outputs = self.outputs.lock().unwrap();
        if bound == 0 || outputs.is_empty() {
            return 0;
        }
        let mut idx = self.index.lock().unwrap();
        let value = outputs[*idx % outputs.len()];
        *idx += 1;
        value % bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_outputs() {
        let random = NullRandom::new(vec![3, 8]);
        assert_eq!(random.next_below(10), 3);
        assert_eq!(random.next_below(10), 8);
        assert_eq!(random.next_below(5), 3);
        assert_eq!(random.next_below(0), 0);
    }
}
