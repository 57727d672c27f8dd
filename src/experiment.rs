//! Training schedules: unsupervised epochs, then supervised epochs, then an
//! evaluation on the testing set.
//!
//! Cancellation is cooperative. The flag is checked between epochs, so a
//! cancelled run still returns the network as trained so far.

use crate::connections::ConnectionStore;
use crate::core::{BionnResult, Network};
use crate::data::{unlabelled, DataProvider};
use crate::evaluation::{evaluate, Evaluation, DEFAULT_ATTEMPTS};
use crate::training::TrainingMetrics;
use crate::{BionnError, NetworkConfig, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Network, strategy and schedule of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub unsupervised_epochs: usize,
    pub supervised_epochs: usize,
    /// Classification passes per test sample
    pub evaluation_attempts: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            training: TrainingConfig::default(),
            unsupervised_epochs: 1,
            supervised_epochs: 1,
            evaluation_attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl ExperimentConfig {
    /// # Errors
    /// - `Io` if the file cannot be read, `Json` if it is not a valid config
    pub fn from_json_file(path: impl AsRef<Path>) -> BionnResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Human-readable name of the network this config trains.
    #[must_use]
    pub fn name(&self) -> String {
        self.network.describe(self.training.algorithm)
    }
}

/// Which half of the schedule an epoch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Unsupervised,
    Supervised,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupervised => write!(f, "unsupervised"),
            Self::Supervised => write!(f, "supervised"),
        }
    }
}

/// Progress notification passed to the caller after every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub epoch: usize,
    /// Samples processed in the current layer of this epoch
    pub samples: usize,
}

/// Metrics of one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub phase: Phase,
    pub epoch: usize,
    pub metrics: TrainingMetrics,
}

/// Result of [`Experiment::run`].
#[derive(Debug)]
pub struct ExperimentReport<S: ConnectionStore> {
    pub name: String,
    pub network: Network<S>,
    pub epochs: Vec<EpochReport>,
    /// `None` when the run was cancelled before evaluation
    pub evaluation: Option<Evaluation>,
    pub cancelled: bool,
}

/// Runs an [`ExperimentConfig`] against a data provider.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    #[must_use]
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Build a fresh network and train it on `provider`.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the provider's class count differs from the network's
    /// - any construction, training or evaluation error
    pub fn run<S, P>(
        &self,
        provider: &P,
        cancel: &AtomicBool,
        progress: Option<&mut dyn FnMut(Progress)>,
    ) -> BionnResult<ExperimentReport<S>>
    where
        S: ConnectionStore + 'static,
        P: DataProvider,
    {
        if provider.number_of_classes() != self.config.network.class_count {
            return Err(BionnError::ShapeMismatch(format!(
                "provider has {} classes, network expects {}",
                provider.number_of_classes(),
                self.config.network.class_count
            )));
        }
        let network = Network::new(&self.config.network)?;
        self.continue_training(network, provider, cancel, progress)
    }

    /// Train an existing network on `provider` following the schedule.
    ///
    /// # Errors
    /// - any training or evaluation error
    pub fn continue_training<S, P>(
        &self,
        mut network: Network<S>,
        provider: &P,
        cancel: &AtomicBool,
        mut progress: Option<&mut dyn FnMut(Progress)>,
    ) -> BionnResult<ExperimentReport<S>>
    where
        S: ConnectionStore + 'static,
        P: DataProvider,
    {
        let name = self.config.name();
        let mut algorithm = self.config.training.build::<S>()?;
        let training = provider.training_set();
        let samples = unlabelled(training);
        let mut epochs = Vec::new();
        info!(%name, training = training.len(), "starting experiment");

        let schedule = (0..self.config.unsupervised_epochs)
            .map(|epoch| (Phase::Unsupervised, epoch))
            .chain((0..self.config.supervised_epochs).map(|epoch| (Phase::Supervised, epoch)));

        for (phase, epoch) in schedule {
            if cancel.load(Ordering::Relaxed) {
                warn!(%phase, epoch, "experiment cancelled");
                return Ok(ExperimentReport {
                    name,
                    network,
                    epochs,
                    evaluation: None,
                    cancelled: true,
                });
            }

            let mut forward = |done: usize| {
                if let Some(callback) = progress.as_mut() {
                    callback(Progress {
                        phase,
                        epoch,
                        samples: done,
                    });
                }
            };
            let metrics = match phase {
                Phase::Unsupervised => {
                    algorithm.train_unsupervised(&mut network, &samples, Some(&mut forward))?
                }
                Phase::Supervised => algorithm.train_supervised(
                    &mut network,
                    training,
                    self.config.training.mode,
                    Some(&mut forward),
                )?,
            };
            info!(
                %phase,
                epoch,
                edge_updates = metrics.edge_updates,
                reconstruction_error = metrics.reconstruction_error,
                "epoch complete"
            );
            epochs.push(EpochReport {
                phase,
                epoch,
                metrics,
            });
        }

        let evaluation = evaluate(&network, provider.testing_set(), self.config.evaluation_attempts)?;
        Ok(ExperimentReport {
            name,
            network,
            epochs,
            evaluation: Some(evaluation),
            cancelled: false,
        })
    }
}
