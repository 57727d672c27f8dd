//! Generating visible states by running the network backwards ("dreaming").
//!
//! ## Algorithm
//!
//! ```text
//! h = random activations (p = 0.5) over layer g+1
//! loop:
//!     v   = propagate_left(h, g)
//!     p_x = mean over n runs of propagate_to_input_layer(h, g)
//!     yield p_x
//!     h   = propagate_right(v, g)
//! ```
//!
//! The sequence never ends on its own; callers stop pulling when they have
//! enough.

use crate::connections::ConnectionStore;
use crate::core::{Activations, BionnError, BionnResult, Network};
use crate::utils::estimate_probabilities;

/// Lazy, unbounded sequence of input-layer activation probabilities.
///
/// After an error the iterator is exhausted.
#[derive(Debug)]
pub struct VisibleStates<'a, S: ConnectionStore> {
    network: &'a Network<S>,
    layer: usize,
    samples: usize,
    hidden: Activations,
    failed: bool,
}

impl<'a, S: ConnectionStore> VisibleStates<'a, S> {
    /// Current hidden activations (right partition of the generation layer).
    #[must_use]
    pub fn hidden(&self) -> &[usize] {
        &self.hidden
    }

    fn step(&mut self) -> BionnResult<Vec<f64>> {
        let network = self.network;
        let visible = network.propagate_left(&self.hidden, self.layer)?;
        let draws = (0..self.samples)
            .map(|_| network.propagate_to_input_layer(&self.hidden, self.layer))
            .collect::<BionnResult<Vec<_>>>()?;
        let probabilities = estimate_probabilities(&draws, network.unit_count(0)?);
        self.hidden = network.propagate_right(&visible, self.layer)?;
        Ok(probabilities.to_vec())
    }
}

impl<S: ConnectionStore> Iterator for VisibleStates<'_, S> {
    type Item = BionnResult<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let state = self.step();
        self.failed = state.is_err();
        Some(state)
    }
}

impl<S: ConnectionStore> Network<S> {
    /// Dream from connection layer `generation_layer`, averaging
    /// `number_of_samples` backward passes per yielded state.
    ///
    /// # Errors
    /// - `OutOfBounds` if `generation_layer >= connection_count`
    /// - `InvalidConfig` if `number_of_samples == 0`
    pub fn generate_visible_states(
        &self,
        generation_layer: usize,
        number_of_samples: usize,
    ) -> BionnResult<VisibleStates<'_, S>> {
        let store = self.connections(generation_layer)?;
        if number_of_samples == 0 {
            return Err(BionnError::InvalidConfig(
                "generation needs at least one sample per state".to_string(),
            ));
        }
        Ok(VisibleStates {
            network: self,
            layer: generation_layer,
            samples: number_of_samples,
            hidden: self.random_activations_uniform(0.5, store.right_count()),
            failed: false,
        })
    }
}
