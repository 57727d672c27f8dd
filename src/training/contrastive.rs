//! Plain single-step Contrastive Divergence on binary activation sets.

use super::{
    check_joint_depth, collect_labels, report, update_edges, ErrorTally, LearningMode,
    TrainingAlgorithm, TrainingMetrics, ERROR_INTERVAL,
};
use crate::connections::{validate_probability, ConnectionStore};
use crate::core::{Activations, BionnError, BionnResult, Network};
use crate::data::{LabelledSample, Sample, SampleData};
use crate::utils::{indicator, outer, symmetric_difference};
use tracing::{debug, info, instrument};

/// CD-1 with 0/1 statistics.
///
/// # Algorithm
///
/// ```text
/// for each connection layer l (left to right):
///     for each sample:
///         v+ = activations carried over from layer l-1 (or the input)
///         h+ = propagate_right(v+)          (or the clamped label units)
///         v- = propagate_left(h+)
///         h- = propagate_right(v-)
///         update_edges(l, v+ ⊗ h+ - v- ⊗ h-)
/// ```
///
/// Only feed-forward supervision is offered.
#[derive(Debug, Clone)]
pub struct ContrastiveDivergence {
    learning_probability: f64,
    adaptive_thresholds: bool,
}

impl ContrastiveDivergence {
    /// # Errors
    /// - `InvalidProbability` if `learning_probability` is outside `[0, 1]`
    pub fn new(learning_probability: f64) -> BionnResult<Self> {
        validate_probability("learning_probability", learning_probability)?;
        Ok(Self {
            learning_probability,
            adaptive_thresholds: false,
        })
    }

    /// Apply the EMA threshold rule to each trained layer's right side.
    #[must_use]
    pub fn with_adaptive_thresholds(mut self, enabled: bool) -> Self {
        self.adaptive_thresholds = enabled;
        self
    }

    #[must_use]
    pub fn learning_probability(&self) -> f64 {
        self.learning_probability
    }

    fn train<S: ConnectionStore, D: SampleData>(
        &self,
        network: &mut Network<S>,
        samples: &[D],
        supervised: bool,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        let labels = if supervised {
            collect_labels(network, samples)?
        } else {
            Vec::new()
        };
        let connection_count = network.connection_count();
        let mut carried: Vec<Activations> = samples
            .iter()
            .map(|sample| network.input_activations(sample.data()))
            .collect();

        let mut metrics = TrainingMetrics::new(samples.len());
        let mut reconstruction = ErrorTally::default();
        let mut label_reconstruction = ErrorTally::default();

        for layer in 0..connection_count {
            let label_layer = layer + 1 == connection_count;
            if !supervised && label_layer {
                break;
            }
            let trained = !supervised || label_layer;
            let left_units = network.unit_count(layer)?;
            let right_units = network.unit_count(layer + 1)?;
            let updates_before = metrics.edge_updates;
            let mut window = ErrorTally::default();

            for (index, active) in carried.iter_mut().enumerate() {
                let positive_left = std::mem::take(active);
                let positive_right = if supervised && label_layer {
                    network.label_units(labels[index])?
                } else {
                    network.propagate_right(&positive_left, layer)?
                };
                if !trained {
                    *active = positive_right;
                    continue;
                }

                let negative_left = network.propagate_left(&positive_right, layer)?;
                let negative_right = network.propagate_right(&negative_left, layer)?;

                #[allow(clippy::cast_precision_loss)]
                let error = symmetric_difference(&positive_left, &negative_left) as f64;
                reconstruction.add(error);
                window.add(error);
                if label_layer {
                    #[allow(clippy::cast_precision_loss)]
                    let label_error = symmetric_difference(&positive_right, &negative_right) as f64;
                    label_reconstruction.add(label_error);
                }
                if (index + 1) % ERROR_INTERVAL == 0 {
                    debug!(layer, samples = index + 1, error = window.mean(), "reconstruction error");
                    window = ErrorTally::default();
                }

                let signal = outer(
                    &indicator(&positive_left, left_units),
                    &indicator(&positive_right, right_units),
                ) - outer(
                    &indicator(&negative_left, left_units),
                    &indicator(&negative_right, right_units),
                );
                metrics.edge_updates +=
                    update_edges(network, layer, &signal, self.learning_probability)?;

                if self.adaptive_thresholds && !label_layer {
                    network.record_activity(layer + 1, &positive_right)?;
                    network.adapt_thresholds();
                }

                *active = positive_right;
                report(&mut progress, index + 1);
            }

            if trained {
                metrics.layers_trained += 1;
                info!(
                    layer,
                    edge_updates = metrics.edge_updates - updates_before,
                    error = reconstruction.mean(),
                    "trained connection layer"
                );
            }
        }

        metrics.reconstruction_error = reconstruction.mean();
        metrics.label_reconstruction_error = label_reconstruction.mean();
        Ok(metrics)
    }
}

impl<S: ConnectionStore> TrainingAlgorithm<S> for ContrastiveDivergence {
    fn name(&self) -> &'static str {
        "CD"
    }

    #[instrument(skip_all, fields(algorithm = "CD", samples = samples.len()))]
    fn train_unsupervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[Sample],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        self.train(network, samples, false, progress)
    }

    #[instrument(skip_all, fields(algorithm = "CD", samples = samples.len(), mode = ?mode))]
    fn train_supervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[LabelledSample],
        mode: LearningMode,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        if mode.is_joint() {
            return Err(BionnError::Unsupported(format!(
                "{mode:?} learning is not available for plain CD"
            )));
        }
        check_joint_depth(network, mode)?;
        self.train(network, samples, true, progress)
    }
}
