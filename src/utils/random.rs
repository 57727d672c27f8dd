//! Per-worker random streams.
//!
//! Every stochastic decision in the engine draws from a stream forked off a
//! [`RandomSource`] owned by the network. Forking takes the source lock once,
//! pulls a fresh seed and hands back an independent [`ChaCha8Rng`], so rayon
//! workers never contend on a shared generator while sampling.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Seed generator for per-worker random streams.
pub struct RandomSource {
    root: Mutex<ChaCha8Rng>,
    seeded: bool,
}

impl RandomSource {
    /// Deterministic source. Two sources built from the same seed fork
    /// identical stream sequences.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            root: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            seeded: true,
        }
    }

    /// Source seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            root: Mutex::new(ChaCha8Rng::seed_from_u64(rand::random())),
            seeded: false,
        }
    }

    /// Seeded when `seed` is given, entropy-backed otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::from_seed)
    }

    /// Create an independent stream for one worker or one sequential task.
    pub fn fork(&self) -> ChaCha8Rng {
        let seed = {
            let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
            root.next_u64()
        };
        ChaCha8Rng::seed_from_u64(seed)
    }

    /// Whether the source was created from an explicit seed.
    #[must_use]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }
}

impl fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSource")
            .field("seeded", &self.seeded)
            .finish_non_exhaustive()
    }
}
