//! # BioNN (Biologically inspired stochastic binary networks)
//!
//! A from-scratch engine for layered networks of binary units joined by
//! small integer weights, trained with Contrastive Divergence on populations
//! of randomly activated units instead of continuous gradients.
//!
//! ## Overview
//!
//! Units are either on or off. A unit turns on when the summed weights of
//! its active neighbours reach its threshold, and every edge may fail to
//! transmit with probability `1 - synapse_success_probability`. Training
//! compares data-driven (positive) and model-driven (negative) co-activations
//! and nudges individual weights up or down by one, stochastically.
//!
//! ## Structure
//!
//! - [`connections`]: bipartite weight stores (dense and sparse)
//! - [`core`]: network structure, activation engine, thresholds, inspection
//! - [`training`]: CD, sampling CD, persistent CD and local Hebbian rules
//! - [`generation`]: "dreaming" visible states from a hidden layer
//! - [`persistence`]: flat little-endian binary save/load
//! - [`evaluation`]: majority-vote classification and accuracy
//! - [`experiment`]: unsupervised-then-supervised training schedules
//! - [`data`]: sample types and data provider interfaces
//! - [`utils`]: vector helpers and the per-worker random source

pub mod connections;
pub mod core;
pub mod data;
pub mod evaluation;
pub mod experiment;
pub mod generation;
pub mod persistence;
pub mod pool;
pub mod training;
pub mod utils;

pub use crate::core::{Activations, BionnError, BionnResult, Network, NetworkParams, Thresholds};
pub use connections::{ConnectionStore, DenseConnections, Edge, Partition, SparseConnections};
pub use data::{DataProvider, Filter, LabelledSample, Sample, SampleData};
pub use generation::VisibleStates;
pub use training::{
    AlgorithmKind, ContrastiveDivergence, HebbianTrainer, LearningMode,
    PersistentContrastiveDivergence, SamplingContrastiveDivergence, TrainingAlgorithm,
    TrainingMetrics,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Network topology and unit parameters.
///
/// Layer sizes are `[input_units, hidden_layers.., class_count * units_per_class]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub input_units: usize,
    pub hidden_layers: Vec<usize>,
    pub class_count: usize,
    pub units_per_class: usize,
    pub activation_threshold: i32,
    pub synapse_success_probability: f64,
    pub max_input_activations: usize,
    pub min_weight: i32,
    pub max_weight: i32,
    /// Probability of each weight `min_weight..=max_weight`; `None` spreads
    /// 5% inhibitory and 15% excitatory mass
    pub weight_probabilities: Option<Vec<f64>>,
    /// Fixed seed for reproducible runs; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_units: 784,
            hidden_layers: vec![500],
            class_count: 10,
            units_per_class: 10,
            activation_threshold: 3,
            synapse_success_probability: 1.0,
            max_input_activations: 10000,
            min_weight: -1,
            max_weight: 1,
            weight_probabilities: None,
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Default parameters with the given layer layout.
    #[must_use]
    pub fn with_layers(
        input_units: usize,
        hidden_layers: Vec<usize>,
        class_count: usize,
        units_per_class: usize,
    ) -> Self {
        Self {
            input_units,
            hidden_layers,
            class_count,
            units_per_class,
            ..Self::default()
        }
    }

    /// Human-readable network name, e.g. `CD 2l 500 upc10 p1.0 t3 w-1..1`.
    #[must_use]
    pub fn describe(&self, algorithm: AlgorithmKind) -> String {
        let mut parts = vec![
            algorithm.abbreviation().to_string(),
            format!("{}l", 1 + self.hidden_layers.len()),
        ];
        if !self.hidden_layers.is_empty() {
            parts.push(self.hidden_layers.iter().join("-"));
        }
        parts.push(format!("upc{}", self.units_per_class));
        parts.push(format!("p{:.1}", self.synapse_success_probability));
        parts.push(format!("t{}", self.activation_threshold));
        parts.push(format!("w{}..{}", self.min_weight, self.max_weight));
        parts.join(" ")
    }

    /// # Errors
    /// - `Io` if the file cannot be read, `Json` if it is not a valid config
    pub fn from_json_file(path: impl AsRef<Path>) -> BionnResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Training strategy selection and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub algorithm: AlgorithmKind,
    /// Chance that an edge with a unit learning signal is stepped
    pub learning_probability: f64,
    /// Stochastic draws per phase estimate (sampling CD and PCD)
    pub activation_samples: usize,
    /// Fantasy particles per connection layer (PCD)
    pub particles: usize,
    /// Supervised learning mode
    pub mode: LearningMode,
    /// Run the EMA threshold rule after every sample
    pub adaptive_thresholds: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::Cd,
            learning_probability: 0.05,
            activation_samples: 1,
            particles: 1,
            mode: LearningMode::FeedForward,
            adaptive_thresholds: false,
        }
    }
}
