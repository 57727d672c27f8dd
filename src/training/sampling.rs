//! Contrastive Divergence on sampled activation probabilities.
//!
//! Instead of single binary activation sets, each phase runs
//! `activation_samples` stochastic propagations and averages them into
//! per-unit probabilities. The learning signal is the difference of the
//! probability outer products, so strongly disagreeing pairs are updated
//! more often than weakly disagreeing ones.
//!
//! The training sweep here is shared with persistent CD; the two differ
//! only in where the negative phase is seeded (see [`NegativeChain`]).

use super::{
    check_joint_depth, collect_labels, report, update_edges, ErrorTally, FreshChain,
    LearningMode, NegativeChain, TrainingAlgorithm, TrainingMetrics, ERROR_INTERVAL,
};
use crate::connections::{validate_probability, ConnectionStore, Partition};
use crate::core::{Activations, BionnError, BionnResult, Network};
use crate::data::{LabelledSample, Sample, SampleData};
use crate::utils::{estimate_probabilities, indicator, outer, squared_error};
use ndarray::Array1;
use tracing::{debug, info, instrument};

/// Hyperparameters shared by the sampling strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SamplingSettings {
    pub(crate) learning_probability: f64,
    pub(crate) activation_samples: usize,
    pub(crate) adaptive_thresholds: bool,
}

impl SamplingSettings {
    pub(crate) fn new(learning_probability: f64, activation_samples: usize) -> BionnResult<Self> {
        validate_probability("learning_probability", learning_probability)?;
        if activation_samples == 0 {
            return Err(BionnError::InvalidConfig(
                "activation_samples must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            learning_probability,
            activation_samples,
            adaptive_thresholds: false,
        })
    }
}

/// Sampling CD with all three supervised modes.
#[derive(Debug, Clone)]
pub struct SamplingContrastiveDivergence {
    settings: SamplingSettings,
}

impl SamplingContrastiveDivergence {
    /// # Errors
    /// - `InvalidProbability` if `learning_probability` is outside `[0, 1]`
    /// - `InvalidConfig` if `activation_samples` is zero
    pub fn new(learning_probability: f64, activation_samples: usize) -> BionnResult<Self> {
        Ok(Self {
            settings: SamplingSettings::new(learning_probability, activation_samples)?,
        })
    }

    #[must_use]
    pub fn with_adaptive_thresholds(mut self, enabled: bool) -> Self {
        self.settings.adaptive_thresholds = enabled;
        self
    }

    #[must_use]
    pub fn activation_samples(&self) -> usize {
        self.settings.activation_samples
    }
}

impl<S: ConnectionStore> TrainingAlgorithm<S> for SamplingContrastiveDivergence {
    fn name(&self) -> &'static str {
        "CDS"
    }

    #[instrument(skip_all, fields(algorithm = "CDS", samples = samples.len()))]
    fn train_unsupervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[Sample],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        train_sampling(network, samples, None, &self.settings, &mut FreshChain, progress)
    }

    #[instrument(skip_all, fields(algorithm = "CDS", samples = samples.len(), mode = ?mode))]
    fn train_supervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[LabelledSample],
        mode: LearningMode,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        check_joint_depth(network, mode)?;
        train_sampling(network, samples, Some(mode), &self.settings, &mut FreshChain, progress)
    }
}

/// Estimated negative-phase probabilities.
struct NegativePhase {
    visible: Array1<f64>,
    hidden: Array1<f64>,
    /// Present only for the three-way joint phase
    labels: Option<Array1<f64>>,
}

/// `n` draws hidden → visible, then each visible draw → hidden.
///
/// `hidden` names the partition of connection layer `layer` that plays the
/// hidden role; the other one is visible.
fn negative_phase<S: ConnectionStore>(
    network: &Network<S>,
    seed: &[usize],
    layer: usize,
    hidden: Partition,
    draws: usize,
) -> BionnResult<NegativePhase> {
    let (visible_units, hidden_units) = match hidden {
        Partition::Right => (network.unit_count(layer)?, network.unit_count(layer + 1)?),
        Partition::Left => (network.unit_count(layer + 1)?, network.unit_count(layer)?),
    };

    let visible_draws = (0..draws)
        .map(|_| network.propagate(hidden, seed, layer))
        .collect::<BionnResult<Vec<_>>>()?;
    let hidden_draws = visible_draws
        .iter()
        .map(|visible| network.propagate(hidden.opposite(), visible, layer))
        .collect::<BionnResult<Vec<_>>>()?;

    Ok(NegativePhase {
        visible: estimate_probabilities(&visible_draws, visible_units),
        hidden: estimate_probabilities(&hidden_draws, hidden_units),
        labels: None,
    })
}

/// Three-way negative phase for the joint layer: the hidden seed is sent
/// left to the visible layer and right to the labels, and the two are
/// combined back into the hidden layer.
fn joint_negative_phase<S: ConnectionStore>(
    network: &Network<S>,
    seed: &[usize],
    layer: usize,
    draws: usize,
) -> BionnResult<NegativePhase> {
    let visible_draws = (0..draws)
        .map(|_| network.propagate_left(seed, layer))
        .collect::<BionnResult<Vec<_>>>()?;
    let label_draws = (0..draws)
        .map(|_| network.propagate_right(seed, layer + 1))
        .collect::<BionnResult<Vec<_>>>()?;
    let hidden_draws = visible_draws
        .iter()
        .zip(&label_draws)
        .map(|(visible, labels)| network.propagate_to_middle(visible, labels, layer))
        .collect::<BionnResult<Vec<_>>>()?;

    Ok(NegativePhase {
        visible: estimate_probabilities(&visible_draws, network.unit_count(layer)?),
        hidden: estimate_probabilities(&hidden_draws, network.unit_count(layer + 1)?),
        labels: Some(estimate_probabilities(
            &label_draws,
            network.unit_count(layer + 2)?,
        )),
    })
}

/// Layer-by-layer sampling CD sweep.
///
/// `supervision` is `None` for unsupervised training. Joint modes train the
/// second-to-last connection layer against the preceding hidden layer and
/// the clamped labels at once, then the last connection layer against the
/// same labels.
pub(crate) fn train_sampling<S, D, C>(
    network: &mut Network<S>,
    samples: &[D],
    supervision: Option<LearningMode>,
    settings: &SamplingSettings,
    chain: &mut C,
    mut progress: Option<&mut dyn FnMut(usize)>,
) -> BionnResult<TrainingMetrics>
where
    S: ConnectionStore,
    D: SampleData,
    C: NegativeChain<S>,
{
    let supervised = supervision.is_some();
    let mode = supervision.unwrap_or(LearningMode::FeedForward);
    let joint = mode.is_joint();
    let labels = if supervised {
        collect_labels(network, samples)?
    } else {
        Vec::new()
    };
    let draws = settings.activation_samples;
    let lp = settings.learning_probability;
    let connection_count = network.connection_count();
    let restarts_before = chain.restarts();

    let mut previous: Vec<Array1<f64>> = samples
        .iter()
        .map(|sample| sample.data().iter().map(|&b| f64::from(b) / 255.0).collect())
        .collect();

    let mut metrics = TrainingMetrics::new(samples.len());
    let mut reconstruction = ErrorTally::default();
    let mut label_reconstruction = ErrorTally::default();

    for layer in 0..connection_count {
        let last = layer + 1 == connection_count;
        if (!supervised || joint) && last {
            break;
        }
        let supervised_layer = supervised && last;
        let joint_layer = joint && layer + 2 == connection_count;
        let trained = !supervised || supervised_layer || joint_layer;
        let right_units = network.unit_count(layer + 1)?;
        let updates_before = metrics.edge_updates;

        let mut current: Vec<Array1<f64>> = vec![Array1::zeros(0); samples.len()];
        let mut window = ErrorTally::default();

        for (index, positive_left) in previous.iter().enumerate() {
            let label_units = if supervised_layer || joint_layer {
                network.label_units(labels[index])?
            } else {
                Vec::new()
            };

            // positive phase
            let (positive_right, positive_seed) = if supervised_layer {
                (indicator(&label_units, right_units), label_units.clone())
            } else {
                let right_draws = (0..draws)
                    .map(|_| {
                        let left = network.random_activations(positive_left);
                        if joint_layer {
                            network.propagate_to_middle(&left, &label_units, layer)
                        } else {
                            network.propagate_right(&left, layer)
                        }
                    })
                    .collect::<BionnResult<Vec<Activations>>>()?;
                let probabilities = estimate_probabilities(&right_draws, right_units);
                current[index] = probabilities.clone();
                let seed = right_draws.into_iter().next().unwrap_or_default();
                (probabilities, seed)
            };
            if !trained {
                continue;
            }

            // negative phase
            let seed = chain.seed(layer, &positive_seed);
            let mut negative = if joint_layer && mode == LearningMode::JointNormal {
                joint_negative_phase(network, &seed, layer, draws)?
            } else {
                negative_phase(network, &seed, layer, Partition::Right, draws)?
            };

            let error = squared_error(positive_left, &negative.visible);
            reconstruction.add(error);
            window.add(error);

            let signal = outer(positive_left, &positive_right)
                - outer(&negative.visible, &negative.hidden);
            metrics.edge_updates += update_edges(network, layer, &signal, lp)?;
            chain.advance(network, layer, joint)?;

            if joint_layer {
                let label_count = network.unit_count(layer + 2)?;
                let positive_labels = indicator(&label_units, label_count);
                let (negative_hidden, negative_labels) = match negative.labels.take() {
                    Some(labels) => (negative.hidden, labels),
                    None => {
                        let direct =
                            negative_phase(network, &positive_seed, layer + 1, Partition::Left, draws)?;
                        (direct.hidden, direct.visible)
                    }
                };

                #[allow(clippy::cast_precision_loss)]
                let per_unit = network.units_per_class() as f64;
                label_reconstruction.add(squared_error(&positive_labels, &negative_labels) / per_unit);

                let joint_signal = outer(&positive_right, &positive_labels)
                    - outer(&negative_hidden, &negative_labels);
                metrics.edge_updates += update_edges(network, layer + 1, &joint_signal, lp)?;
                chain.advance(network, layer + 1, joint)?;
            }

            if settings.adaptive_thresholds && !supervised_layer {
                network.record_activity(layer + 1, &positive_seed)?;
                network.adapt_thresholds();
            }

            if (index + 1) % ERROR_INTERVAL == 0 {
                debug!(layer, samples = index + 1, error = window.mean(), "reconstruction error");
                window = ErrorTally::default();
            }
            report(&mut progress, index + 1);
        }

        if trained {
            metrics.layers_trained += if joint_layer { 2 } else { 1 };
            info!(
                layer,
                joint = joint_layer,
                edge_updates = metrics.edge_updates - updates_before,
                error = reconstruction.mean(),
                "trained connection layer"
            );
        }
        previous = current;
    }

    metrics.reconstruction_error = reconstruction.mean();
    metrics.label_reconstruction_error = label_reconstruction.mean();
    metrics.chain_restarts = chain.restarts() - restarts_before;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkConfig;

    fn network(hidden: Vec<usize>) -> Network {
        let mut config = NetworkConfig::with_layers(6, hidden, 2, 2);
        config.activation_threshold = 1;
        config.seed = Some(21);
        config.weight_probabilities = Some(vec![0.1, 0.4, 0.5]);
        Network::new(&config).unwrap()
    }

    fn labelled() -> Vec<LabelledSample> {
        vec![
            LabelledSample::new(vec![255, 200, 255, 0, 0, 10], 0),
            LabelledSample::new(vec![0, 10, 0, 255, 220, 255], 1),
            LabelledSample::new(vec![240, 255, 230, 0, 5, 0], 0),
        ]
    }

    #[test]
    fn test_settings_validation() {
        assert!(SamplingContrastiveDivergence::new(0.1, 0).is_err());
        assert!(SamplingContrastiveDivergence::new(1.5, 2).is_err());
        assert_eq!(SamplingContrastiveDivergence::new(0.1, 3).unwrap().activation_samples(), 3);
    }

    #[test]
    fn test_unsupervised_trains_all_but_label_layer() {
        let mut cds = SamplingContrastiveDivergence::new(1.0, 3).unwrap();
        let mut network = network(vec![5, 4]);
        let before = network.all_weights(2).unwrap();
        let samples: Vec<Sample> = labelled().into_iter().map(|s| s.sample).collect();

        let metrics = cds.train_unsupervised(&mut network, &samples, None).unwrap();
        assert_eq!(metrics.layers_trained, 2);
        assert!(metrics.reconstruction_error >= 0.0);
        assert_eq!(network.all_weights(2).unwrap(), before);
    }

    #[test]
    fn test_feed_forward_supervision() {
        let mut cds = SamplingContrastiveDivergence::new(1.0, 2).unwrap();
        let mut network = network(vec![5]);
        let before = network.all_weights(0).unwrap();
        let metrics = cds
            .train_supervised(&mut network, &labelled(), LearningMode::FeedForward, None)
            .unwrap();
        assert_eq!(metrics.layers_trained, 1);
        assert_eq!(network.all_weights(0).unwrap(), before);
    }

    #[test]
    fn test_joint_modes_train_last_two_layers() {
        for mode in [LearningMode::JointNormal, LearningMode::JointAlternative] {
            let mut cds = SamplingContrastiveDivergence::new(1.0, 2).unwrap();
            let mut network = network(vec![5, 4]);
            let first = network.all_weights(0).unwrap();
            let mut calls = 0;
            let mut observer = |_: usize| calls += 1;

            let metrics = cds
                .train_supervised(&mut network, &labelled(), mode, Some(&mut observer))
                .unwrap();
            assert_eq!(metrics.layers_trained, 2);
            assert_eq!(network.all_weights(0).unwrap(), first);
            assert_eq!(calls, 3);
        }
    }

    #[test]
    fn test_joint_mode_needs_hidden_layer() {
        let mut cds = SamplingContrastiveDivergence::new(1.0, 1).unwrap();
        let mut network = network(vec![]);
        assert!(matches!(
            cds.train_supervised(&mut network, &labelled(), LearningMode::JointNormal, None),
            Err(BionnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_negative_phase_shapes() {
        let network = network(vec![5]);
        let phase = negative_phase(&network, &[0, 1], 0, Partition::Right, 3).unwrap();
        assert_eq!(phase.visible.len(), 6);
        assert_eq!(phase.hidden.len(), 5);

        let phase = negative_phase(&network, &[0], 1, Partition::Left, 2).unwrap();
        assert_eq!(phase.visible.len(), 4);
        assert_eq!(phase.hidden.len(), 5);

        let phase = joint_negative_phase(&network, &[0, 2], 0, 2).unwrap();
        assert_eq!(phase.labels.map(|l| l.len()), Some(4));
        assert!(phase.visible.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
