//! Activation engine: stochastic input encoding and layer-to-layer propagation.
//!
//! ## Algorithm
//!
//! ```text
//! for each active source unit s (in parallel):
//!     for each non-zero edge (s, t, w):
//!         if p_syn >= 1 or U(0,1) < p_syn:
//!             counter[t] += w            (atomic)
//! active targets = { t : counter[t] >= threshold[t] }
//! ```
//!
//! Every rayon job forks its own generator from the network's
//! [`RandomSource`](crate::utils::RandomSource), so coin flips never contend
//! on a shared lock.

use super::{Activations, BionnResult, Network};
use crate::connections::{ConnectionStore, Partition};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, Ordering};

impl<S: ConnectionStore> Network<S> {
    /// Stochastically activate input units from byte intensities.
    ///
    /// Unit `i` is on iff `data[i] > U(0,1) · 255`, so intensity 0 never
    /// fires and 255 almost always does. If more than
    /// `max_input_activations` units fire, a uniform subset of exactly that
    /// size is kept.
    pub fn input_activations(&self, data: &[u8]) -> Activations {
        let mut rng = self.random.fork();
        let mut active: Activations = data
            .iter()
            .enumerate()
            .filter(|&(_, &byte)| f64::from(byte) > rng.gen::<f64>() * 255.0)
            .map(|(unit, _)| unit)
            .collect();

        let cap = self.params.max_input_activations;
        if active.len() > cap {
            let (kept, _) = active.partial_shuffle(&mut rng, cap);
            let mut kept = kept.to_vec();
            kept.sort_unstable();
            active = kept;
        }
        active
    }

    /// Activate unit `i` with probability `probabilities[i]`.
    pub fn random_activations<'a>(
        &self,
        probabilities: impl IntoIterator<Item = &'a f64>,
    ) -> Activations {
        let mut rng = self.random.fork();
        probabilities
            .into_iter()
            .enumerate()
            .filter(|&(_, &p)| rng.gen::<f64>() < p)
            .map(|(unit, _)| unit)
            .collect()
    }

    /// Activate each of `units` units independently with probability `p`.
    pub fn random_activations_uniform(&self, p: f64, units: usize) -> Activations {
        let mut rng = self.random.fork();
        (0..units).filter(|_| rng.gen::<f64>() < p).collect()
    }

    /// Propagate `active` units of `source` across connection layer `layer`.
    ///
    /// The result lives in the opposite partition: layer `layer + 1` when
    /// propagating from the left, layer `layer` when propagating from the
    /// right.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer` is not a connection layer or a unit in
    ///   `active` is outside `source`
    pub fn propagate(
        &self,
        source: Partition,
        active: &[usize],
        layer: usize,
    ) -> BionnResult<Activations> {
        let store = self.connections(layer)?;
        let target_layer = match source {
            Partition::Left => layer + 1,
            Partition::Right => layer,
        };

        let counters = self.counters.get(store.partition_size(source.opposite()));
        let counted = self.count_signals(store, source, active, &counters);
        let activated = counted.map(|()| self.thresholds.activated(target_layer, &counters));
        self.counters.put(counters);
        activated
    }

    /// Propagate from layer `layer` to layer `layer + 1`.
    ///
    /// # Errors
    /// See [`Network::propagate`].
    pub fn propagate_right(&self, active: &[usize], layer: usize) -> BionnResult<Activations> {
        self.propagate(Partition::Left, active, layer)
    }

    /// Propagate from layer `layer + 1` back to layer `layer`.
    ///
    /// # Errors
    /// See [`Network::propagate`].
    pub fn propagate_left(&self, active: &[usize], layer: usize) -> BionnResult<Activations> {
        self.propagate(Partition::Right, active, layer)
    }

    /// Activate the middle layer `left_layer + 1` from both neighbours.
    ///
    /// Signals from `left` (layer `left_layer`) and from `right` (layer
    /// `left_layer + 2`) are summed into the same counters and thresholded
    /// once.
    ///
    /// # Errors
    /// - `OutOfBounds` if `left_layer + 1` is not a connection layer
    pub fn propagate_to_middle(
        &self,
        left: &[usize],
        right: &[usize],
        left_layer: usize,
    ) -> BionnResult<Activations> {
        let into_middle = self.connections(left_layer)?;
        let from_right = self.connections(left_layer + 1)?;

        let counters = self.counters.get(into_middle.right_count());
        let counted = self
            .count_signals(into_middle, Partition::Left, left, &counters)
            .and_then(|()| self.count_signals(from_right, Partition::Right, right, &counters));
        let activated = counted.map(|()| self.thresholds.activated(left_layer + 1, &counters));
        self.counters.put(counters);
        activated
    }

    /// Propagate from layer `start_layer + 1` all the way down to the input
    /// layer.
    ///
    /// # Errors
    /// - `OutOfBounds` if `start_layer` is not a connection layer
    pub fn propagate_to_input_layer(
        &self,
        active: &[usize],
        start_layer: usize,
    ) -> BionnResult<Activations> {
        self.connections(start_layer)?;
        let mut current = active.to_vec();
        for layer in (0..=start_layer).rev() {
            current = self.propagate_left(&current, layer)?;
        }
        Ok(current)
    }

    /// Feed-forward pass from the input layer to the output layer.
    ///
    /// # Errors
    /// - `OutOfBounds` if an input unit is outside layer 0
    pub fn feed_forward(&self, data: &[u8]) -> BionnResult<Activations> {
        let mut current = self.input_activations(data);
        for layer in 0..self.connection_count() {
            current = self.propagate_right(&current, layer)?;
        }
        Ok(current)
    }

    fn count_signals(
        &self,
        store: &S,
        source: Partition,
        active: &[usize],
        counters: &[AtomicI32],
    ) -> BionnResult<()> {
        let p = self.params.synapse_success_probability;
        let reliable = p >= 1.0;

        active.par_iter().try_for_each_init(
            || self.random.fork(),
            |rng, &unit| {
                for edge in store.neighbours(unit, source, true)? {
                    if reliable || rng.gen::<f64>() < p {
                        counters[edge.target].fetch_add(edge.weight, Ordering::Relaxed);
                    }
                }
                Ok(())
            },
        )
    }
}
