//! Local Hebbian rules without a negative phase.
//!
//! These predate the contrastive strategies: they only ever create or remove
//! excitatory edges between co-active units and never produce inhibitory
//! weights. "Excitatory" and "silent" are `1` and `0` clamped into the
//! network's weight range; a range without room for both leaves the rule
//! with nothing to do.

use super::{collect_labels, report, LearningMode, TrainingAlgorithm, TrainingMetrics};
use crate::connections::{validate_probability, ConnectionStore, Partition};
use crate::core::{BionnError, BionnResult, Network};
use crate::data::{LabelledSample, Sample, SampleData};
use rand::Rng;
use std::fmt;

/// Silent and excitatory weights clamped into `[min_weight, max_weight]`.
fn clamped_levels<S: ConnectionStore>(network: &Network<S>) -> (i32, i32) {
    let (min, max) = (network.min_weight(), network.max_weight());
    (0.clamp(min, max), 1.clamp(min, max))
}
use tracing::{info, instrument};

/// A weight rule applied to one connection layer given both activation sets.
pub trait LocalRule: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Adjust the weights of connection layer `layer`. Returns the number of
    /// weights changed.
    ///
    /// # Errors
    /// - `OutOfBounds` if an active unit is outside its partition
    fn apply<S: ConnectionStore>(
        &self,
        network: &mut Network<S>,
        layer: usize,
        left: &[usize],
        right: &[usize],
    ) -> BionnResult<usize>;
}

/// Co-active pairs without an edge gain an excitatory one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NaiveHebbian {
    pub strengthening_probability: f64,
}

impl NaiveHebbian {
    /// # Errors
    /// - `InvalidProbability` if the probability is outside `[0, 1]`
    pub fn new(strengthening_probability: f64) -> BionnResult<Self> {
        validate_probability("strengthening_probability", strengthening_probability)?;
        Ok(Self {
            strengthening_probability,
        })
    }
}

impl LocalRule for NaiveHebbian {
    fn name(&self) -> &'static str {
        "naive-hebbian"
    }

    fn apply<S: ConnectionStore>(
        &self,
        network: &mut Network<S>,
        layer: usize,
        left: &[usize],
        right: &[usize],
    ) -> BionnResult<usize> {
        let (silent, excitatory) = clamped_levels(network);
        if silent == excitatory {
            return Ok(0);
        }
        let mut rng = network.random().fork();
        let store = network.connections_mut(layer)?;
        let mut changed = 0;
        for &i in left {
            for &j in right {
                if store.edge(i, j)?.weight == silent
                    && rng.gen::<f64>() < self.strengthening_probability
                {
                    store.set_edge(i, j, excitatory)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

/// Steers the number of incoming edges of each active right unit toward a
/// target degree.
///
/// ```text
/// p = (target - degree) / (2 · max_input_activations)
/// p > 0: co-active pairs with weight 0 become 1 with probability p
/// p < 0: co-active pairs with weight 1 become 0 with probability -p
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetedRightDegree {
    pub target_degree: usize,
}

impl LocalRule for TargetedRightDegree {
    fn name(&self) -> &'static str {
        "targeted-right-degree"
    }

    fn apply<S: ConnectionStore>(
        &self,
        network: &mut Network<S>,
        layer: usize,
        left: &[usize],
        right: &[usize],
    ) -> BionnResult<usize> {
        #[allow(clippy::cast_precision_loss)]
        let scale = 2.0 * network.max_input_activations().max(1) as f64;
        let (silent, excitatory) = clamped_levels(network);
        if silent == excitatory {
            return Ok(0);
        }
        let mut rng = network.random().fork();
        let store = network.connections_mut(layer)?;
        let mut changed = 0;

        for &j in right {
            let degree = store.neighbours(j, Partition::Right, true)?.count();
            if degree == self.target_degree {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let p = (self.target_degree as f64 - degree as f64) / scale;
            for &i in left {
                let weight = store.edge(i, j)?.weight;
                if p > 0.0 && weight == silent && rng.gen::<f64>() < p {
                    store.set_edge(i, j, excitatory)?;
                    changed += 1;
                } else if p < 0.0 && weight == excitatory && rng.gen::<f64>() < -p {
                    store.set_edge(i, j, silent)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

/// Trains with a [`LocalRule`] on feed-forward activations.
#[derive(Debug, Clone)]
pub struct HebbianTrainer<R: LocalRule> {
    rule: R,
}

impl<R: LocalRule> HebbianTrainer<R> {
    pub fn new(rule: R) -> Self {
        Self { rule }
    }

    #[must_use]
    pub fn rule(&self) -> &R {
        &self.rule
    }
}

impl<S: ConnectionStore, R: LocalRule> TrainingAlgorithm<S> for HebbianTrainer<R> {
    fn name(&self) -> &'static str {
        self.rule.name()
    }

    /// Propagate each sample right through every layer, applying the rule to
    /// each connection layer on the way.
    #[instrument(skip_all, fields(rule = self.rule.name(), samples = samples.len()))]
    fn train_unsupervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[Sample],
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        let mut metrics = TrainingMetrics::new(samples.len());
        for (index, sample) in samples.iter().enumerate() {
            let mut left = network.input_activations(sample.data());
            for layer in 0..network.connection_count() {
                let right = network.propagate_right(&left, layer)?;
                metrics.edge_updates += self.rule.apply(network, layer, &left, &right)?;
                left = right;
            }
            report(&mut progress, index + 1);
        }
        metrics.layers_trained = network.connection_count();
        info!(edge_updates = metrics.edge_updates, "hebbian pass complete");
        Ok(metrics)
    }

    /// Propagate to the last hidden layer, clamp the label units and apply
    /// the rule to the last connection layer only.
    #[instrument(skip_all, fields(rule = self.rule.name(), samples = samples.len()))]
    fn train_supervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[LabelledSample],
        mode: LearningMode,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        if mode.is_joint() {
            return Err(BionnError::Unsupported(format!(
                "{mode:?} learning is not available for local rules"
            )));
        }
        let labels = collect_labels(network, samples)?;
        let last = network.connection_count() - 1;
        let mut metrics = TrainingMetrics::new(samples.len());

        for (index, sample) in samples.iter().enumerate() {
            let mut left = network.input_activations(sample.data());
            for layer in 0..last {
                left = network.propagate_right(&left, layer)?;
            }
            let right = network.label_units(labels[index])?;
            metrics.edge_updates += self.rule.apply(network, last, &left, &right)?;
            report(&mut progress, index + 1);
        }
        metrics.layers_trained = 1;
        info!(edge_updates = metrics.edge_updates, "hebbian label pass complete");
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::DenseConnections;
    use crate::core::NetworkParams;
    use crate::NetworkConfig;

    fn empty_network(max_input_activations: usize) -> Network {
        let mut config = NetworkConfig::with_layers(3, vec![], 1, 2);
        config.activation_threshold = 0;
        config.max_input_activations = max_input_activations;
        let store = DenseConnections::new(3, 2).unwrap();
        Network::from_parts(NetworkParams::from(&config), vec![3, 2], vec![store], Some(2)).unwrap()
    }

    #[test]
    fn test_naive_rule_creates_excitatory_edges() {
        let mut network = empty_network(10);
        let rule = NaiveHebbian::new(1.0).unwrap();
        assert_eq!(rule.apply(&mut network, 0, &[0, 2], &[1]).unwrap(), 2);
        assert_eq!(network.all_weights(0).unwrap(), vec![0, 1, 0, 0, 0, 1]);
        assert!(NaiveHebbian::new(1.5).is_err());
    }

    #[test]
    fn test_targeted_degree_adds_then_removes() {
        // scale = 2 · 1 = 2, so p = (target - degree) / 2
        let mut network = empty_network(1);
        let grow = TargetedRightDegree { target_degree: 2 };
        // degree 0 → p = 1: every co-active zero edge becomes 1
        assert_eq!(grow.apply(&mut network, 0, &[0, 1, 2], &[0]).unwrap(), 3);

        let shrink = TargetedRightDegree { target_degree: 1 };
        // degree 3 → p = -1: every co-active unit edge is removed
        assert_eq!(shrink.apply(&mut network, 0, &[0, 1], &[0]).unwrap(), 2);
        assert_eq!(network.all_weights(0).unwrap(), vec![0, 0, 0, 0, 1, 0]);

        // degree equals target: untouched
        assert_eq!(shrink.apply(&mut network, 0, &[0, 1, 2], &[0]).unwrap(), 0);
    }

    #[test]
    fn test_trainer_supervised_clamps_labels() {
        let mut network = empty_network(10);
        let mut trainer = HebbianTrainer::new(NaiveHebbian::new(1.0).unwrap());
        let samples = vec![LabelledSample::new(vec![255, 0, 255], 0)];

        let metrics = trainer
            .train_supervised(&mut network, &samples, LearningMode::FeedForward, None)
            .unwrap();
        assert_eq!(metrics.edge_updates, 4);
        assert_eq!(network.all_weights(0).unwrap(), vec![1, 1, 0, 0, 1, 1]);
        assert!(matches!(
            trainer.train_supervised(&mut network, &samples, LearningMode::JointNormal, None),
            Err(BionnError::Unsupported(_))
        ));
    }

    #[test]
    fn test_trainer_unsupervised_walks_every_layer() {
        let mut network = empty_network(10);
        let mut trainer = HebbianTrainer::new(NaiveHebbian::new(1.0).unwrap());
        let samples = vec![Sample::new(vec![255, 255, 0])];
        let metrics = trainer.train_unsupervised(&mut network, &samples, None).unwrap();
        // threshold 0 turns on every right unit, so both active inputs connect to both
        assert_eq!(metrics.edge_updates, 4);
        assert_eq!(TrainingAlgorithm::<DenseConnections>::name(&trainer), "naive-hebbian");
    }

    #[test]
    fn test_rules_respect_weight_range() {
        let mut config = NetworkConfig::with_layers(3, vec![], 1, 2);
        config.activation_threshold = 0;
        config.min_weight = -2;
        config.max_weight = 0;
        let store = DenseConnections::new(3, 2).unwrap();
        let mut network =
            Network::from_parts(NetworkParams::from(&config), vec![3, 2], vec![store], Some(3))
                .unwrap();

        let naive = NaiveHebbian::new(1.0).unwrap();
        assert_eq!(naive.apply(&mut network, 0, &[0, 1, 2], &[0, 1]).unwrap(), 0);
        let targeted = TargetedRightDegree { target_degree: 3 };
        assert_eq!(targeted.apply(&mut network, 0, &[0, 1, 2], &[0, 1]).unwrap(), 0);
        assert!(network.all_weights(0).unwrap().iter().all(|&w| w == 0));
    }
}
