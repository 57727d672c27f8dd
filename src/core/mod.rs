//! Core network structure and error types.
//!
//! This module provides the fundamental network structures:
//! - Layer layout with label units grouped per class in the output layer
//! - One [`ConnectionStore`] per pair of adjacent layers
//! - Per-unit activation thresholds
//! - The random source every stochastic operation forks from
//!
//! ## Layout
//!
//! ```text
//! layer:        0 (input)     1 ...      L-1 (output)
//! units:        n_0           n_1        class_count · units_per_class
//! connections:        c_0          ...  c_{L-2}
//! label units of class c: [c · upc, (c+1) · upc)
//! ```
//!
//! Propagation lives in [`propagation`], threshold bookkeeping in
//! [`thresholds`], and classification / reconstruction in [`inspect`].

pub mod inspect;
pub mod propagation;
pub mod thresholds;

pub use thresholds::Thresholds;

use crate::connections::{
    spread_weight_probabilities, validate_probability, ConnectionStore, DenseConnections,
    WeightDistribution,
};
use crate::pool::{CounterPool, PoolStats};
use crate::utils::RandomSource;
use crate::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Error type for network operations.
#[derive(Debug, Error)]
pub enum BionnError {
    /// Invalid network or training configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Unit, layer or label index outside its range
    #[error("{what} index {index} out of range (0..{len})")]
    OutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },
    /// Probability parameter outside `[0, 1]`
    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: String, value: f64 },
    /// Mismatched vector or matrix lengths
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Operation not offered by this strategy
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Supervised training received an unlabelled sample
    #[error("sample {index} has no label")]
    MissingLabel { index: usize },
    /// Corrupt or inconsistent persisted network
    #[error("invalid network data: {0}")]
    Format(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BionnResult<T> = Result<T, BionnError>;

/// Indices of the active units in one layer, sorted ascending.
pub type Activations = Vec<usize>;

/// Scalar parameters persisted with every network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Signal a unit needs to activate (initial per-unit threshold)
    pub activation_threshold: i32,
    pub class_count: usize,
    pub units_per_class: usize,
    /// Cap on simultaneously active input units
    pub max_input_activations: usize,
    /// Chance that an edge transmits on a given propagation
    pub synapse_success_probability: f64,
    pub min_weight: i32,
    pub max_weight: i32,
}

impl From<&NetworkConfig> for NetworkParams {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            activation_threshold: config.activation_threshold,
            class_count: config.class_count,
            units_per_class: config.units_per_class,
            max_input_activations: config.max_input_activations,
            synapse_success_probability: config.synapse_success_probability,
            min_weight: config.min_weight,
            max_weight: config.max_weight,
        }
    }
}

/// A layered stochastic binary network.
///
/// # Architecture
///
/// - **Layers:** indexed 0 (input) to L-1 (output); only unit counts are stored
/// - **Connections:** `connections[l]` joins layer `l` (left) to `l+1` (right)
/// - **Weights:** small integers in `[min_weight, max_weight]`, 0 = no edge
/// - **Thresholds:** one integer per unit, initially `activation_threshold`
///
/// The storage backend is chosen by the type parameter; the dense matrix is
/// the default.
pub struct Network<S: ConnectionStore = DenseConnections> {
    pub(crate) params: NetworkParams,
    pub(crate) unit_counts: Vec<usize>,
    pub(crate) connections: Vec<S>,
    pub(crate) thresholds: Thresholds,
    pub(crate) random: RandomSource,
    pub(crate) counters: CounterPool,
}

impl<S: ConnectionStore> fmt::Debug for Network<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("params", &self.params)
            .field("unit_counts", &self.unit_counts)
            .field(
                "connections",
                &format!("<{} connection layers>", self.connections.len()),
            )
            .field("random", &self.random)
            .finish()
    }
}

impl<S: ConnectionStore> Network<S> {
    /// Create a network and stochastically initialize every connection layer.
    ///
    /// Layer sizes are `[input_units, hidden_layers.., class_count * units_per_class]`.
    /// Weights are drawn from `config.weight_probabilities`, or from
    /// [`spread_weight_probabilities`] with 5% inhibitory / 15% excitatory
    /// mass when none are given.
    ///
    /// # Errors
    /// - `InvalidConfig` for empty layers, zero classes, or `min_weight >= max_weight`
    /// - `InvalidProbability` for a synapse or weight probability outside `[0, 1]`
    /// - `ShapeMismatch` if the weight probabilities do not cover `min..=max`
    pub fn new(config: &NetworkConfig) -> BionnResult<Self> {
        let params = NetworkParams::from(config);
        let mut unit_counts = Vec::with_capacity(config.hidden_layers.len() + 2);
        unit_counts.push(config.input_units);
        unit_counts.extend_from_slice(&config.hidden_layers);
        unit_counts.push(output_units(config.class_count, config.units_per_class)?);
        validate(&params, &unit_counts)?;

        let probabilities = config.weight_probabilities.clone().unwrap_or_else(|| {
            spread_weight_probabilities(params.min_weight, params.max_weight, 0.05, 0.15)
        });
        let distribution =
            WeightDistribution::new(params.min_weight, params.max_weight, &probabilities)?;

        let random = RandomSource::new(config.seed);
        let mut connections = Vec::with_capacity(unit_counts.len() - 1);
        for (layer, pair) in unit_counts.windows(2).enumerate() {
            let mut store = S::new(pair[0], pair[1])?;
            let created = store.fill(&distribution, &mut random.fork())?;
            info!(layer, left = pair[0], right = pair[1], edges = created, "initialized connection layer");
            connections.push(store);
        }

        Self::assemble(params, unit_counts, connections, random)
    }

    /// Build a network around existing connection stores.
    ///
    /// Used when loading a saved network and by callers that wire weights by
    /// hand. Thresholds start at `params.activation_threshold`.
    ///
    /// # Errors
    /// - `InvalidConfig` / `InvalidProbability` as for [`Network::new`]
    /// - `ShapeMismatch` if the stores do not join consecutive layers
    pub fn from_parts(
        params: NetworkParams,
        unit_counts: Vec<usize>,
        connections: Vec<S>,
        seed: Option<u64>,
    ) -> BionnResult<Self> {
        validate(&params, &unit_counts)?;
        Self::assemble(params, unit_counts, connections, RandomSource::new(seed))
    }

    fn assemble(
        params: NetworkParams,
        unit_counts: Vec<usize>,
        connections: Vec<S>,
        random: RandomSource,
    ) -> BionnResult<Self> {
        if connections.len() + 1 != unit_counts.len() {
            return Err(BionnError::ShapeMismatch(format!(
                "{} unit layers need {} connection layers, got {}",
                unit_counts.len(),
                unit_counts.len() - 1,
                connections.len()
            )));
        }
        for (layer, store) in connections.iter().enumerate() {
            let expected = (unit_counts[layer], unit_counts[layer + 1]);
            if (store.left_count(), store.right_count()) != expected {
                return Err(BionnError::ShapeMismatch(format!(
                    "connection layer {layer} is {}x{}, expected {}x{}",
                    store.left_count(),
                    store.right_count(),
                    expected.0,
                    expected.1
                )));
            }
        }

        let thresholds = Thresholds::new(params.activation_threshold, &unit_counts);
        Ok(Self {
            params,
            unit_counts,
            connections,
            thresholds,
            random,
            counters: CounterPool::new(),
        })
    }

    /// Number of unit layers, input and output included.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.unit_counts.len()
    }

    /// Number of connection layers (`layer_count - 1`).
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// # Errors
    /// - `OutOfBounds` if `layer >= layer_count`
    pub fn unit_count(&self, layer: usize) -> BionnResult<usize> {
        self.unit_counts
            .get(layer)
            .copied()
            .ok_or(BionnError::OutOfBounds {
                what: "layer",
                index: layer,
                len: self.unit_counts.len(),
            })
    }

    #[must_use]
    pub fn unit_counts(&self) -> &[usize] {
        &self.unit_counts
    }

    #[must_use]
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.params.class_count
    }

    #[must_use]
    pub fn units_per_class(&self) -> usize {
        self.params.units_per_class
    }

    #[must_use]
    pub fn activation_threshold(&self) -> i32 {
        self.params.activation_threshold
    }

    #[must_use]
    pub fn synapse_success_probability(&self) -> f64 {
        self.params.synapse_success_probability
    }

    #[must_use]
    pub fn max_input_activations(&self) -> usize {
        self.params.max_input_activations
    }

    #[must_use]
    pub fn min_weight(&self) -> i32 {
        self.params.min_weight
    }

    #[must_use]
    pub fn max_weight(&self) -> i32 {
        self.params.max_weight
    }

    /// The store joining layer `layer` to `layer + 1`.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer >= connection_count`
    pub fn connections(&self, layer: usize) -> BionnResult<&S> {
        let len = self.connections.len();
        self.connections.get(layer).ok_or(BionnError::OutOfBounds {
            what: "connection layer",
            index: layer,
            len,
        })
    }

    /// # Errors
    /// - `OutOfBounds` if `layer >= connection_count`
    pub fn connections_mut(&mut self, layer: usize) -> BionnResult<&mut S> {
        let len = self.connections.len();
        self.connections.get_mut(layer).ok_or(BionnError::OutOfBounds {
            what: "connection layer",
            index: layer,
            len,
        })
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn thresholds_mut(&mut self) -> &mut Thresholds {
        &mut self.thresholds
    }

    /// Output units that encode `label`.
    ///
    /// # Errors
    /// - `OutOfBounds` if `label >= class_count`
    pub fn label_units(&self, label: usize) -> BionnResult<Activations> {
        if label >= self.params.class_count {
            return Err(BionnError::OutOfBounds {
                what: "label",
                index: label,
                len: self.params.class_count,
            });
        }
        let upc = self.params.units_per_class;
        Ok((label * upc..(label + 1) * upc).collect())
    }

    pub(crate) fn random(&self) -> &RandomSource {
        &self.random
    }

    /// Counter-buffer reuse statistics.
    #[must_use]
    pub fn counter_stats(&self) -> PoolStats {
        self.counters.stats()
    }
}

/// Size of the output layer, `class_count * units_per_class`.
///
/// # Errors
/// - `InvalidConfig` if the product overflows `usize`
pub(crate) fn output_units(class_count: usize, units_per_class: usize) -> BionnResult<usize> {
    class_count.checked_mul(units_per_class).ok_or_else(|| {
        BionnError::InvalidConfig(format!(
            "{class_count} classes of {units_per_class} units overflow the output layer"
        ))
    })
}

/// Structural checks shared by construction and loading.
fn validate(params: &NetworkParams, unit_counts: &[usize]) -> BionnResult<()> {
    if unit_counts.len() < 2 {
        return Err(BionnError::InvalidConfig(
            "Must have at least 2 layers (input and output)".to_string(),
        ));
    }
    if let Some(layer) = unit_counts.iter().position(|&n| n == 0) {
        return Err(BionnError::InvalidConfig(format!(
            "each layer must have a positive number of units (layer {layer} is empty)"
        )));
    }
    if params.class_count == 0 || params.units_per_class == 0 {
        return Err(BionnError::InvalidConfig(
            "class_count and units_per_class must both be positive".to_string(),
        ));
    }
    let outputs = unit_counts[unit_counts.len() - 1];
    let expected = output_units(params.class_count, params.units_per_class)?;
    if outputs != expected {
        return Err(BionnError::ShapeMismatch(format!(
            "output layer has {outputs} units, expected class_count * units_per_class = {expected}"
        )));
    }
    if params.min_weight >= params.max_weight {
        return Err(BionnError::InvalidConfig(format!(
            "minimum weight {} must be smaller than maximum weight {}",
            params.min_weight, params.max_weight
        )));
    }
    validate_probability(
        "synapse_success_probability",
        params.synapse_success_probability,
    )
}
