//! Classification and read-only inspection of a trained network.

use super::{Activations, BionnError, BionnResult, Network};
use crate::connections::{ConnectionStore, Partition};
use crate::utils::{euclidean_distance, symmetric_difference};
use itertools::Itertools;
use ndarray::Array2;
use rand::seq::SliceRandom;

impl<S: ConnectionStore> Network<S> {
    /// Most likely class of `data` from one stochastic feed-forward pass.
    ///
    /// # Errors
    /// - `OutOfBounds` if `data` is longer than the input layer
    pub fn classify(&self, data: &[u8]) -> BionnResult<usize> {
        self.classify_with_counts(data).map(|(label, _)| label)
    }

    /// Like [`Network::classify`], also returning the number of active
    /// output units per class.
    ///
    /// # Errors
    /// - `OutOfBounds` if `data` is longer than the input layer
    pub fn classify_with_counts(&self, data: &[u8]) -> BionnResult<(usize, Vec<usize>)> {
        let output = self.feed_forward(data)?;
        Ok(self.deduce_label(&output))
    }

    /// Count active output units per class and pick the class with the most,
    /// breaking ties uniformly at random.
    #[must_use]
    pub fn deduce_label(&self, output: &[usize]) -> (usize, Vec<usize>) {
        let upc = self.params.units_per_class;
        let mut counts = vec![0; self.params.class_count];
        for &unit in output {
            if let Some(count) = counts.get_mut(unit / upc) {
                *count += 1;
            }
        }
        (self.argmax_random_tie(&counts), counts)
    }

    pub(crate) fn argmax_random_tie(&self, counts: &[usize]) -> usize {
        let best = counts.iter().max().copied().unwrap_or(0);
        let candidates: Vec<usize> = counts.iter().positions(|&c| c == best).collect();
        candidates
            .choose(&mut self.random.fork())
            .copied()
            .unwrap_or(0)
    }

    /// Backward path-weighted influence of `mask` (over `layer`'s units) on
    /// the input units.
    ///
    /// # Algorithm
    /// ```text
    /// for l = layer-1 down to 0:
    ///     next[i] = Σ_j mask[j] · w_l(i, j)      (non-zero mask, non-zero edges)
    ///     mask = next
    /// ```
    /// Past the first hop the sign of an entry is not a reliable "likes"
    /// indicator; two negative edges in a row contribute positively.
    ///
    /// For `layer == 0` the mask is returned unchanged.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer >= layer_count`
    /// - `ShapeMismatch` if `mask.len() != unit_count(layer)`
    pub fn reconstruct(&self, layer: usize, mask: &[i32]) -> BionnResult<Vec<i32>> {
        let len = self.unit_count(layer)?;
        if mask.len() != len {
            return Err(BionnError::ShapeMismatch(format!(
                "mask has {} entries, layer {layer} has {len} units",
                mask.len()
            )));
        }

        let mut current = mask.to_vec();
        for connection in (0..layer).rev() {
            let store = self.connections(connection)?;
            let mut next = vec![0; store.left_count()];
            for (unit, &m) in current.iter().enumerate().filter(|&(_, &m)| m != 0) {
                for edge in store.neighbours(unit, Partition::Right, true)? {
                    next[edge.target] += m * edge.weight;
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Heat map of a single unit: [`Network::reconstruct`] with a one-hot mask.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer` or `unit` is out of range
    pub fn reconstruct_unit(&self, layer: usize, unit: usize) -> BionnResult<Vec<i32>> {
        let len = self.unit_count(layer)?;
        if unit >= len {
            return Err(BionnError::OutOfBounds {
                what: "unit",
                index: unit,
                len,
            });
        }
        let mut mask = vec![0; len];
        mask[unit] = 1;
        self.reconstruct(layer, &mask)
    }

    /// How well partial label activations restore the full label.
    ///
    /// For every `seed_size`-subset of `label`'s units, propagate left into
    /// the last hidden layer and back right, then measure the symmetric
    /// difference against the full label unit set. Returns the mean.
    ///
    /// # Errors
    /// - `OutOfBounds` if `label >= class_count`
    /// - `InvalidConfig` unless `1 <= seed_size <= units_per_class`
    pub fn check_label_reconstruction(&self, label: usize, seed_size: usize) -> BionnResult<f64> {
        let units = self.label_units(label)?;
        if seed_size == 0 || seed_size > units.len() {
            return Err(BionnError::InvalidConfig(format!(
                "seed size must be in 1..={}, got {seed_size}",
                units.len()
            )));
        }

        let last = self.connection_count() - 1;
        let mut total = 0;
        let mut seeds = 0;
        for seed in units.iter().copied().combinations(seed_size) {
            let hidden = self.propagate_left(&seed, last)?;
            let restored: Activations = self.propagate_right(&hidden, last)?;
            total += symmetric_difference(&restored, &units);
            seeds += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(total as f64 / seeds as f64)
    }

    /// Every weight of connection layer `layer`, row-major.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer` is not a connection layer
    pub fn all_weights(&self, layer: usize) -> BionnResult<Vec<i32>> {
        let store = self.connections(layer)?;
        let mut weights = Vec::with_capacity(store.left_count() * store.right_count());
        for left in 0..store.left_count() {
            weights.extend(store.neighbours(left, Partition::Left, false)?.map(|e| e.weight));
        }
        Ok(weights)
    }

    /// Per class, the pairwise Euclidean distances between the incoming
    /// weight vectors of its label units.
    ///
    /// Small off-diagonal entries mean the class's label units learned
    /// nearly the same feature.
    ///
    /// # Errors
    /// - `OutOfBounds` only if the network is internally inconsistent
    pub fn label_weight_distances(&self) -> BionnResult<Vec<Array2<f64>>> {
        let store = self.connections(self.connection_count() - 1)?;
        let upc = self.params.units_per_class;

        (0..self.params.class_count)
            .map(|label| {
                let incoming = self
                    .label_units(label)?
                    .into_iter()
                    .map(|unit| {
                        store
                            .neighbours(unit, Partition::Right, false)
                            .map(|edges| edges.map(|e| e.weight).collect::<Vec<_>>())
                    })
                    .collect::<BionnResult<Vec<_>>>()?;

                Ok(Array2::from_shape_fn((upc, upc), |(a, b)| {
                    euclidean_distance(&incoming[a], &incoming[b])
                }))
            })
            .collect()
    }
}
