//! Random number generator abstraction for determinism.
//!
//! Delivery backoff draws its jitter from here. In tests a fixed
//! implementation is injected so retry schedules are reproducible.

use rand::Rng;

/// Abstraction over random number generation.
pub trait DeterministicRng: Send + Sync {
    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Production RNG backed by the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRng;

impl DeterministicRng for ThreadRng {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}
