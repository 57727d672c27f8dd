//! Buffer pool for reusing signal-counter arrays.
//!
//! # Motivation
//!
//! Every propagation needs one `AtomicI32` counter per target unit. Training
//! propagates several times per sample per layer, so allocating the counters
//! each time dominates small-network profiles. The pool keeps returned
//! buffers and hands them out again, resized and zeroed.
//!
//! # Thread Safety
//!
//! The stack of free buffers sits behind a `Mutex`. A buffer is taken before
//! the parallel counting section and returned after thresholding, so rayon
//! workers only ever touch the atomics inside it, never the pool itself.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Per-target-unit signal counters.
pub type Counters = Vec<AtomicI32>;

/// Pool of zeroed counter buffers.
#[derive(Debug, Default)]
pub struct CounterPool {
    /// Stack of free buffers (LIFO for cache locality)
    buffers: Mutex<Vec<Counters>>,
    /// Buffers ever created
    total_allocated: AtomicUsize,
    /// `get()` calls served from the stack
    hits: AtomicUsize,
    /// `get()` calls that allocated
    misses: AtomicUsize,
}

/// Statistics from the counter pool for performance diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    pub total_allocated: usize,
    pub hits: usize,
    pub misses: usize,
    /// Buffers currently waiting for reuse
    pub available: usize,
    /// Hit rate as a fraction `[0.0, 1.0]`
    pub hit_rate: f32,
}

#[allow(clippy::must_use_candidate)]
impl CounterPool {
    /// Empty pool; buffers are allocated on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a buffer of exactly `len` counters, all zero.
    pub fn get(&self, len: usize) -> Counters {
        let reused = {
            let mut pool = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
            pool.pop()
        };

        match reused {
            Some(mut counters) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counters.truncate(len);
                for c in &counters {
                    c.store(0, Ordering::Relaxed);
                }
                counters.resize_with(len, || AtomicI32::new(0));
                counters
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.total_allocated.fetch_add(1, Ordering::Relaxed);
                (0..len).map(|_| AtomicI32::new(0)).collect()
            }
        }
    }

    /// Hand a buffer back for reuse.
    pub fn put(&self, counters: Counters) {
        let mut pool = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        pool.push(counters);
    }

    /// Current number of free buffers.
    pub fn available(&self) -> usize {
        self.buffers.lock().map_or(0, |g| g.len())
    }

    pub fn stats(&self) -> PoolStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_gets = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total_gets > 0 {
            hits as f32 / total_gets as f32
        } else {
            0.0
        };

        PoolStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            hits,
            misses,
            available: self.available(),
            hit_rate,
        }
    }
}
