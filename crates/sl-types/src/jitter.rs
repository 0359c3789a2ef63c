//! Injectable PRNG for deterministic retry-backoff jitter.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// A source of bounded random numbers, used only for retry-backoff jitter.
///
/// Kept separate from a general-purpose RNG trait so call sites read as
/// "jitter", not "randomness used for something load-bearing".
pub trait Jitter: Send + Sync {
    /// Returns a value in `[0, bound)`. `bound == 0` always returns 0.
    fn next_u64_below(&self, bound: u64) -> u64;
}

/// Production jitter source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandJitter;

impl Jitter for RandJitter {
    fn next_u64_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Deterministic jitter source for tests: cycles through a fixed sequence.
#[derive(Debug)]
pub struct DeterministicJitter {
    sequence: Vec<u64>,
    cursor: AtomicU64,
}

impl DeterministicJitter {
    /// Build a jitter source that replays `sequence` forever (mod len).
    pub fn new(sequence: Vec<u64>) -> Self {
        assert!(!sequence.is_empty(), "sequence must be non-empty");
        Self {
            sequence,
            cursor: AtomicU64::new(0),
        }
    }

    /// A jitter source that always returns 0 (useful when jitter is disabled).
    pub fn zero() -> Self {
        Self::new(vec![0])
    }
}

impl Jitter for DeterministicJitter {
    fn next_u64_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) as usize % self.sequence.len();
        self.sequence[idx] % bound
    }
}
