//! Training strategies, learning signals and metrics.
//!
//! ## Overview
//!
//! Every strategy sweeps the connection layers left to right. For each
//! sample it gathers positive (data-driven) and negative (model-driven)
//! co-activation statistics for one layer and turns their difference into
//! stochastic one-step weight changes:
//!
//! ```text
//! signal[i, j] = pos_left[i] · pos_right[j] - neg_left[i] · neg_right[j]
//! if signal != 0 and U(0,1) < |signal| · learning_probability:
//!     w[i, j] = clamp(w[i, j] ± 1, min_weight, max_weight)
//! ```
//!
//! - [`ContrastiveDivergence`]: binary activation sets, one Gibbs round trip
//! - [`SamplingContrastiveDivergence`]: activation probabilities estimated from repeated draws
//! - [`PersistentContrastiveDivergence`]: sampling CD with persistent fantasy particles
//! - [`HebbianTrainer`]: legacy local rules without a negative phase

pub mod contrastive;
pub mod hebbian;
pub mod persistent;
pub mod sampling;

pub use contrastive::ContrastiveDivergence;
pub use hebbian::{HebbianTrainer, LocalRule, NaiveHebbian, TargetedRightDegree};
pub use persistent::PersistentContrastiveDivergence;
pub use sampling::SamplingContrastiveDivergence;

use crate::connections::ConnectionStore;
use crate::core::{Activations, BionnError, BionnResult, Network};
use crate::data::{LabelledSample, Sample, SampleData};
use crate::TrainingConfig;
use clap::ValueEnum;
use ndarray::Array2;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Samples between two reconstruction error reports.
pub const ERROR_INTERVAL: usize = 100;

/// Which contrastive-divergence variant to train with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    /// Plain binary CD
    Cd,
    /// CD on sampled activation probabilities
    CdSampling,
    /// Persistent (fantasy particle) sampling CD
    Pcd,
}

impl AlgorithmKind {
    /// Short tag used in network names.
    #[must_use]
    pub fn abbreviation(self) -> &'static str {
        match self {
            AlgorithmKind::Cd => "CD",
            AlgorithmKind::CdSampling => "CDS",
            AlgorithmKind::Pcd => "PCD",
        }
    }
}

/// How supervised training treats the label layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LearningMode {
    /// Train only the last connection layer against clamped labels
    FeedForward,
    /// Train the last two connection layers jointly; negative labels come
    /// from a hidden → visible → hidden round trip
    JointNormal,
    /// Like `JointNormal`, but negative labels come from propagating the
    /// hidden layer straight to the labels
    JointAlternative,
}

impl LearningMode {
    #[must_use]
    pub fn is_joint(self) -> bool {
        !matches!(self, LearningMode::FeedForward)
    }
}

/// Summary of one training pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Samples in the pass
    pub samples: usize,
    /// Connection layers whose weights were adjusted
    pub layers_trained: usize,
    /// Edges whose weight actually changed
    pub edge_updates: usize,
    /// Mean positive/negative disagreement on the left partition
    pub reconstruction_error: f64,
    /// Mean positive/negative disagreement on the label units (joint modes)
    pub label_reconstruction_error: f64,
    /// Dead fantasy particles revived from data (PCD)
    pub chain_restarts: usize,
}

impl TrainingMetrics {
    pub(crate) fn new(samples: usize) -> Self {
        Self {
            samples,
            ..Self::default()
        }
    }
}

/// A training strategy bound to a connection store type.
///
/// Progress callbacks receive the number of samples processed so far in the
/// current layer.
pub trait TrainingAlgorithm<S: ConnectionStore>: Send {
    fn name(&self) -> &'static str;

    /// Train every connection layer except the last on unlabelled data.
    ///
    /// # Errors
    /// - `OutOfBounds` / `ShapeMismatch` if a sample does not fit the input layer
    fn train_unsupervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[Sample],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics>;

    /// Train the label layer (and, in joint modes, the layer before it).
    ///
    /// # Errors
    /// - `Unsupported` if the strategy lacks `mode`
    /// - `InvalidConfig` for joint modes on networks with fewer than 3 layers
    /// - `OutOfBounds` for labels outside `0..class_count`
    fn train_supervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[LabelledSample],
        mode: LearningMode,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics>;
}

impl TrainingConfig {
    /// Instantiate the configured strategy.
    ///
    /// # Errors
    /// - `InvalidProbability` if `learning_probability` is outside `[0, 1]`
    /// - `InvalidConfig` if `activation_samples` or `particles` is zero
    pub fn build<S: ConnectionStore + 'static>(
        &self,
    ) -> BionnResult<Box<dyn TrainingAlgorithm<S>>> {
        let algorithm: Box<dyn TrainingAlgorithm<S>> = match self.algorithm {
            AlgorithmKind::Cd => Box::new(
                ContrastiveDivergence::new(self.learning_probability)?
                    .with_adaptive_thresholds(self.adaptive_thresholds),
            ),
            AlgorithmKind::CdSampling => Box::new(
                SamplingContrastiveDivergence::new(
                    self.learning_probability,
                    self.activation_samples,
                )?
                .with_adaptive_thresholds(self.adaptive_thresholds),
            ),
            AlgorithmKind::Pcd => Box::new(
                PersistentContrastiveDivergence::new(
                    self.learning_probability,
                    self.activation_samples,
                    self.particles,
                )?
                .with_adaptive_thresholds(self.adaptive_thresholds),
            ),
        };
        Ok(algorithm)
    }
}

/// Running mean of a per-sample error measure.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ErrorTally {
    total: f64,
    count: usize,
}

impl ErrorTally {
    pub(crate) fn add(&mut self, error: f64) {
        self.total += error;
        self.count += 1;
    }

    pub(crate) fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = self.count as f64;
            self.total / count
        }
    }
}

/// Invoke the progress observer, if any.
pub(crate) fn report(progress: &mut Option<&mut dyn FnMut(usize)>, done: usize) {
    if let Some(observer) = progress.as_mut() {
        observer(done);
    }
}

/// Validated class label of every sample.
pub(crate) fn collect_labels<S: ConnectionStore, D: SampleData>(
    network: &Network<S>,
    samples: &[D],
) -> BionnResult<Vec<usize>> {
    samples
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            let label = sample.label().ok_or(BionnError::MissingLabel { index })?;
            if label >= network.class_count() {
                return Err(BionnError::OutOfBounds {
                    what: "label",
                    index: label,
                    len: network.class_count(),
                });
            }
            Ok(label)
        })
        .collect()
}

/// Joint modes train the last two connection layers, so they need a hidden
/// layer in between.
pub(crate) fn check_joint_depth<S: ConnectionStore>(
    network: &Network<S>,
    mode: LearningMode,
) -> BionnResult<()> {
    if mode.is_joint() && network.layer_count() < 3 {
        return Err(BionnError::InvalidConfig(format!(
            "{mode:?} learning needs at least 3 layers, network has {}",
            network.layer_count()
        )));
    }
    Ok(())
}

/// Stochastically step the weights of connection layer `layer` along `signal`.
///
/// Decisions are made in parallel, one rayon job per left unit with its own
/// random stream; the resulting changes are then written sequentially.
/// Returns the number of weights that changed.
///
/// # Errors
/// - `ShapeMismatch` if `signal` is not `left_count × right_count`
pub(crate) fn update_edges<S: ConnectionStore>(
    network: &mut Network<S>,
    layer: usize,
    signal: &Array2<f64>,
    learning_probability: f64,
) -> BionnResult<usize> {
    let (min_weight, max_weight) = (network.min_weight(), network.max_weight());
    let changes = {
        let network: &Network<S> = network;
        let store = network.connections(layer)?;
        if signal.dim() != (store.left_count(), store.right_count()) {
            return Err(BionnError::ShapeMismatch(format!(
                "learning signal is {:?}, connection layer {layer} is {}x{}",
                signal.dim(),
                store.left_count(),
                store.right_count()
            )));
        }

        (0..store.left_count())
            .into_par_iter()
            .map_init(
                || network.random().fork(),
                |rng, left| -> BionnResult<(usize, Vec<(usize, i32)>)> {
                    let mut row = Vec::new();
                    for (right, &s) in signal.row(left).iter().enumerate() {
                        if s == 0.0 || rng.gen::<f64>() >= s.abs() * learning_probability {
                            continue;
                        }
                        let weight = store.edge(left, right)?.weight;
                        let stepped = if s > 0.0 {
                            (weight + 1).min(max_weight)
                        } else {
                            (weight - 1).max(min_weight)
                        };
                        if stepped != weight {
                            row.push((right, stepped));
                        }
                    }
                    Ok((left, row))
                },
            )
            .collect::<BionnResult<Vec<_>>>()?
    };

    let store = network.connections_mut(layer)?;
    let mut updated = 0;
    for (left, row) in changes {
        for (right, weight) in row {
            store.set_edge(left, right, weight)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Source of the binary hidden activations that seed a negative phase.
pub(crate) trait NegativeChain<S: ConnectionStore> {
    /// Seed for connection layer `layer`, given this sample's positive
    /// hidden activations.
    fn seed(&mut self, layer: usize, positive: &[usize]) -> Activations;

    /// Called after the weights of connection layer `layer` changed.
    fn advance(&mut self, network: &Network<S>, layer: usize, joint: bool) -> BionnResult<()>;

    /// Times a dead chain was revived from data.
    fn restarts(&self) -> usize;
}

/// Plain CD chain: every negative phase starts from the sample's own
/// positive activations.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FreshChain;

impl<S: ConnectionStore> NegativeChain<S> for FreshChain {
    fn seed(&mut self, _layer: usize, positive: &[usize]) -> Activations {
        positive.to_vec()
    }

    fn advance(&mut self, _network: &Network<S>, _layer: usize, _joint: bool) -> BionnResult<()> {
        Ok(())
    }

    fn restarts(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::DenseConnections;
    use crate::core::NetworkParams;
    use crate::NetworkConfig;
    use ndarray::array;

    fn blank(min_weight: i32, max_weight: i32) -> Network {
        let mut config = NetworkConfig::with_layers(2, vec![], 1, 3);
        config.min_weight = min_weight;
        config.max_weight = max_weight;
        let store = DenseConnections::new(2, 3).unwrap();
        Network::from_parts(NetworkParams::from(&config), vec![2, 3], vec![store], Some(4)).unwrap()
    }

    #[test]
    fn test_update_edges_steps_and_clamps() {
        let mut network = blank(-1, 2);
        let signal = array![[1.0, -1.0, 0.0], [1.0, 1.0, -1.0]];
        for _ in 0..5 {
            update_edges(&mut network, 0, &signal, 1.0).unwrap();
        }
        assert_eq!(network.all_weights(0).unwrap(), vec![2, -1, 0, 2, 2, -1]);
        // already saturated
        assert_eq!(update_edges(&mut network, 0, &signal, 1.0).unwrap(), 0);
    }

    #[test]
    fn test_update_edges_zero_probability() {
        let mut network = blank(-1, 1);
        let signal = array![[1.0, 1.0, 1.0], [-1.0, -1.0, -1.0]];
        assert_eq!(update_edges(&mut network, 0, &signal, 0.0).unwrap(), 0);
        assert_eq!(network.connections(0).unwrap().non_zero_count(), 0);
    }

    #[test]
    fn test_update_edges_rejects_wrong_shape() {
        let mut network = blank(-1, 1);
        let signal = Array2::zeros((3, 2));
        assert!(matches!(
            update_edges(&mut network, 0, &signal, 1.0),
            Err(BionnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_collect_labels() {
        let network = blank(-1, 1);
        let samples = vec![LabelledSample::new(vec![1, 2], 0)];
        assert_eq!(collect_labels(&network, &samples).unwrap(), vec![0]);

        let samples = vec![LabelledSample::new(vec![1, 2], 1)];
        assert!(matches!(
            collect_labels(&network, &samples),
            Err(BionnError::OutOfBounds { what: "label", .. })
        ));

        let unlabelled = vec![Sample::new(vec![1, 2])];
        assert!(matches!(
            collect_labels(&network, &unlabelled),
            Err(BionnError::MissingLabel { index: 0 })
        ));
    }

    #[test]
    fn test_joint_modes_need_three_layers() {
        let network = blank(-1, 1);
        assert!(check_joint_depth(&network, LearningMode::FeedForward).is_ok());
        assert!(check_joint_depth(&network, LearningMode::JointNormal).is_err());
    }

    #[test]
    fn test_build_from_config() {
        let mut config = TrainingConfig::default();
        let algorithm = config.build::<DenseConnections>().unwrap();
        assert_eq!(algorithm.name(), "CD");

        config.algorithm = AlgorithmKind::Pcd;
        assert_eq!(config.build::<DenseConnections>().unwrap().name(), "PCD");

        config.particles = 0;
        assert!(config.build::<DenseConnections>().is_err());

        config.algorithm = AlgorithmKind::CdSampling;
        config.learning_probability = 2.0;
        assert!(matches!(
            config.build::<DenseConnections>(),
            Err(BionnError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn test_error_tally() {
        let mut tally = ErrorTally::default();
        assert!(tally.mean().abs() < f64::EPSILON);
        tally.add(1.0);
        tally.add(2.0);
        assert!((tally.mean() - 1.5).abs() < 1e-12);
    }
}
