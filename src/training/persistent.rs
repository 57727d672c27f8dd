//! Persistent Contrastive Divergence with fantasy particles.
//!
//! Each connection layer keeps a small set of hidden activation sets
//! ("particles") that survive across samples and epochs. The negative phase
//! starts from the current particle instead of the sample, and after every
//! weight update each particle takes one Gibbs step so the chains track the
//! model's own distribution.

use super::sampling::{train_sampling, SamplingSettings};
use super::{check_joint_depth, LearningMode, NegativeChain, TrainingAlgorithm, TrainingMetrics};
use crate::connections::ConnectionStore;
use crate::core::{Activations, BionnError, BionnResult, Network};
use crate::data::{LabelledSample, Sample};
use tracing::{instrument, warn};

/// Fantasy particles for every connection layer, used round-robin.
#[derive(Debug, Clone)]
pub(crate) struct Particles {
    per_layer: usize,
    /// `chains[layer][particle]`, empty = dead
    chains: Vec<Vec<Activations>>,
    /// Next particle to hand out, per layer
    current: Vec<usize>,
    restarts: usize,
}

impl Particles {
    pub(crate) fn new(per_layer: usize) -> Self {
        Self {
            per_layer,
            chains: Vec::new(),
            current: Vec::new(),
            restarts: 0,
        }
    }

    /// Make sure there is a (dead) chain set for each of `connection_count`
    /// layers. Existing chains are kept when the layout is unchanged.
    pub(crate) fn ensure_layers(&mut self, connection_count: usize) {
        if self.chains.len() != connection_count {
            self.chains = vec![vec![Vec::new(); self.per_layer]; connection_count];
            self.current = vec![0; connection_count];
        }
    }

    pub(crate) fn chain(&self, layer: usize, particle: usize) -> Option<&Activations> {
        self.chains.get(layer)?.get(particle)
    }

    pub(crate) fn set_chain(&mut self, layer: usize, particle: usize, active: Activations) {
        if let Some(slot) = self.chains.get_mut(layer).and_then(|c| c.get_mut(particle)) {
            *slot = active;
        }
    }
}

impl<S: ConnectionStore> NegativeChain<S> for Particles {
    fn seed(&mut self, layer: usize, positive: &[usize]) -> Activations {
        let Some(chains) = self.chains.get_mut(layer) else {
            return positive.to_vec();
        };
        let index = self.current[layer];
        if chains[index].is_empty() {
            warn!(layer, particle = index, "Restarting particle chain. Activation threshold may be too high.");
            chains[index] = positive.to_vec();
            self.restarts += 1;
        }
        self.current[layer] = (index + 1) % self.per_layer;
        chains[index].clone()
    }

    fn advance(&mut self, network: &Network<S>, layer: usize, joint: bool) -> BionnResult<()> {
        let layer_count = network.layer_count();
        if joint && layer + 3 == layer_count {
            // stepped once the label layer has been updated too
            return Ok(());
        }
        if joint && layer + 2 == layer_count {
            let hidden_layer = layer - 1;
            if let Some(chains) = self.chains.get_mut(hidden_layer) {
                for particle in chains.iter_mut() {
                    let visible = network.propagate_left(particle, hidden_layer)?;
                    let labels = network.propagate_right(particle, layer)?;
                    *particle = network.propagate_to_middle(&visible, &labels, hidden_layer)?;
                }
            }
            return Ok(());
        }
        if let Some(chains) = self.chains.get_mut(layer) {
            for particle in chains.iter_mut() {
                let visible = network.propagate_left(particle, layer)?;
                *particle = network.propagate_right(&visible, layer)?;
            }
        }
        Ok(())
    }

    fn restarts(&self) -> usize {
        self.restarts
    }
}

/// Sampling CD whose negative phase runs on persistent particles.
///
/// Supports feed-forward and joint-normal supervision.
#[derive(Debug, Clone)]
pub struct PersistentContrastiveDivergence {
    settings: SamplingSettings,
    particles: Particles,
}

impl PersistentContrastiveDivergence {
    /// # Errors
    /// - `InvalidProbability` if `learning_probability` is outside `[0, 1]`
    /// - `InvalidConfig` if `activation_samples` or `particles` is zero
    pub fn new(
        learning_probability: f64,
        activation_samples: usize,
        particles: usize,
    ) -> BionnResult<Self> {
        if particles == 0 {
            return Err(BionnError::InvalidConfig(
                "persistent CD needs at least one particle".to_string(),
            ));
        }
        Ok(Self {
            settings: SamplingSettings::new(learning_probability, activation_samples)?,
            particles: Particles::new(particles),
        })
    }

    #[must_use]
    pub fn with_adaptive_thresholds(mut self, enabled: bool) -> Self {
        self.settings.adaptive_thresholds = enabled;
        self
    }

    #[must_use]
    pub fn particle_count(&self) -> usize {
        self.particles.per_layer
    }

    /// Total chain restarts since construction.
    #[must_use]
    pub fn chain_restarts(&self) -> usize {
        self.particles.restarts
    }
}

impl<S: ConnectionStore> TrainingAlgorithm<S> for PersistentContrastiveDivergence {
    fn name(&self) -> &'static str {
        "PCD"
    }

    #[instrument(skip_all, fields(algorithm = "PCD", samples = samples.len()))]
    fn train_unsupervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[Sample],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        self.particles.ensure_layers(network.connection_count());
        train_sampling(network, samples, None, &self.settings, &mut self.particles, progress)
    }

    #[instrument(skip_all, fields(algorithm = "PCD", samples = samples.len(), mode = ?mode))]
    fn train_supervised(
        &mut self,
        network: &mut Network<S>,
        samples: &[LabelledSample],
        mode: LearningMode,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> BionnResult<TrainingMetrics> {
        if mode == LearningMode::JointAlternative {
            return Err(BionnError::Unsupported(
                "joint-alternative learning is not available for persistent CD".to_string(),
            ));
        }
        check_joint_depth(network, mode)?;
        self.particles.ensure_layers(network.connection_count());
        train_sampling(network, samples, Some(mode), &self.settings, &mut self.particles, progress)
    }
}
