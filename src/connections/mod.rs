//! Bipartite connection stores between two adjacent unit layers.
//!
//! ## Overview
//!
//! A store holds one integer weight per (left unit, right unit) pair. Weight
//! zero means "no edge". Propagation walks a unit's incident edges in either
//! direction, so both directions must enumerate in time linear in the size of
//! the opposite partition:
//!
//! ```text
//!   left partition (L units)          right partition (R units)
//!        i ───────── w(i, j) ─────────── j
//!   neighbours(i, Left)  = row i of W          (R entries)
//!   neighbours(j, Right) = column j of W       (L entries)
//! ```
//!
//! Two backings implement [`ConnectionStore`]:
//! - [`DenseConnections`] keeps `W` and `Wᵀ` as `ndarray` matrices.
//! - [`SparseConnections`] keeps only non-zero weights, keyed by unit.

pub mod dense;
pub mod sparse;

pub use dense::DenseConnections;
pub use sparse::SparseConnections;

use crate::core::{BionnError, BionnResult};
use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a bipartite connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Left,
    Right,
}

impl Partition {
    /// The partition on the other side of the connection layer.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Partition::Left => Partition::Right,
            Partition::Right => Partition::Left,
        }
    }
}

/// A weighted edge as seen from `source`.
///
/// For [`ConnectionStore::edge`] the source is the left unit. For
/// [`ConnectionStore::neighbours`] it is the queried unit and `target` lives
/// in the opposite partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: i32,
}

/// Storage capability required by the network and the training strategies.
pub trait ConnectionStore: Send + Sync + fmt::Debug {
    /// Empty store (all weights zero) of the given partition sizes.
    ///
    /// # Errors
    /// - `InvalidConfig` if either partition is empty
    fn new(left: usize, right: usize) -> BionnResult<Self>
    where
        Self: Sized;

    fn left_count(&self) -> usize;

    fn right_count(&self) -> usize;

    /// Weight of the edge between left unit `left` and right unit `right`.
    ///
    /// # Errors
    /// - `OutOfBounds` if either index is outside its partition
    fn edge(&self, left: usize, right: usize) -> BionnResult<Edge>;

    /// Overwrite one weight. No clamping is performed here.
    ///
    /// # Errors
    /// - `OutOfBounds` if either index is outside its partition
    fn set_edge(&mut self, left: usize, right: usize, weight: i32) -> BionnResult<()>;

    /// Edges incident to `unit` in `partition`, ordered by target index.
    ///
    /// With `filter_zero` the zero-weight entries are skipped.
    ///
    /// # Errors
    /// - `OutOfBounds` if `unit` is outside `partition`
    fn neighbours(
        &self,
        unit: usize,
        partition: Partition,
        filter_zero: bool,
    ) -> BionnResult<Box<dyn Iterator<Item = Edge> + '_>>;

    /// Number of edges with a non-zero weight.
    fn non_zero_count(&self) -> usize;

    /// Number of units in `partition`.
    fn partition_size(&self, partition: Partition) -> usize {
        match partition {
            Partition::Left => self.left_count(),
            Partition::Right => self.right_count(),
        }
    }

    /// Stochastically populate every edge from a discrete weight distribution.
    ///
    /// `probabilities[k]` is the probability of weight `min_weight + k`.
    /// Returns the number of non-zero edges created.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `probabilities.len() != max_weight - min_weight + 1`
    /// - `InvalidProbability` if any entry is outside `[0, 1]`
    /// - `InvalidConfig` if `min_weight >= max_weight`
    fn initialize<R: Rng>(
        &mut self,
        min_weight: i32,
        max_weight: i32,
        probabilities: &[f64],
        rng: &mut R,
    ) -> BionnResult<usize>
    where
        Self: Sized,
    {
        let distribution = WeightDistribution::new(min_weight, max_weight, probabilities)?;
        self.fill(&distribution, rng)
    }

    /// Draw every edge weight from `distribution`, row by row.
    fn fill<R: Rng>(&mut self, distribution: &WeightDistribution, rng: &mut R) -> BionnResult<usize>
    where
        Self: Sized,
    {
        let mut created = 0;
        for left in 0..self.left_count() {
            for right in 0..self.right_count() {
                let weight = distribution.sample(rng);
                self.set_edge(left, right, weight)?;
                if weight != 0 {
                    created += 1;
                }
            }
        }
        Ok(created)
    }
}

/// Bounds check shared by the store implementations.
pub(crate) fn check_unit(what: &'static str, index: usize, len: usize) -> BionnResult<()> {
    if index >= len {
        return Err(BionnError::OutOfBounds { what, index, len });
    }
    Ok(())
}

/// Discrete distribution over the integer weights `min..=max`.
///
/// Sampling compares one uniform draw against the cumulative probabilities
/// and picks the first weight whose cumulative value exceeds it. If the
/// probabilities sum to less than one and the draw lands past the total, the
/// sample is 0 (no edge).
#[derive(Debug, Clone, PartialEq)]
pub struct WeightDistribution {
    min_weight: i32,
    cumulative: Vec<f64>,
}

impl WeightDistribution {
    /// # Errors
    /// - `InvalidConfig` if `min_weight >= max_weight`
    /// - `ShapeMismatch` if the probability count does not cover `min..=max`
    /// - `InvalidProbability` if any probability is outside `[0, 1]`
    pub fn new(min_weight: i32, max_weight: i32, probabilities: &[f64]) -> BionnResult<Self> {
        if min_weight >= max_weight {
            return Err(BionnError::InvalidConfig(format!(
                "minimum weight {min_weight} must be smaller than maximum weight {max_weight}"
            )));
        }
        let expected = (i64::from(max_weight) - i64::from(min_weight) + 1) as usize;
        if probabilities.len() != expected {
            return Err(BionnError::ShapeMismatch(format!(
                "expected {expected} weight probabilities for weights {min_weight}..={max_weight}, got {}",
                probabilities.len()
            )));
        }

        let mut cumulative = Vec::with_capacity(expected);
        let mut running = 0.0;
        for (k, &p) in probabilities.iter().enumerate() {
            validate_probability(&format!("weight_probabilities[{k}]"), p)?;
            running += p;
            cumulative.push(running);
        }

        Ok(Self {
            min_weight,
            cumulative,
        })
    }

    #[must_use]
    pub fn min_weight(&self) -> i32 {
        self.min_weight
    }

    #[must_use]
    pub fn max_weight(&self) -> i32 {
        self.min_weight + self.cumulative.len() as i32 - 1
    }
}

impl Distribution<i32> for WeightDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        let draw: f64 = rng.gen();
        self.cumulative
            .iter()
            .position(|&c| draw < c)
            .map_or(0, |k| self.min_weight + k as i32)
    }
}

/// Fail with `InvalidProbability` unless `value ∈ [0, 1]`.
pub(crate) fn validate_probability(name: &str, value: f64) -> BionnResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(BionnError::InvalidProbability {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

/// Weight probabilities that split a total inhibitory and a total excitatory
/// mass evenly over the negative and positive weights respectively.
///
/// Weight 0 receives `1 - inhibitory - excitatory`. When the range has no
/// negative weights the inhibitory mass is moved to the excitatory side, and
/// vice versa.
///
/// # Example
/// ```text
/// spread_weight_probabilities(-1, 1, 0.05, 0.15) == [0.05, 0.80, 0.15]
/// spread_weight_probabilities(-2, 2, 0.10, 0.20) == [0.05, 0.05, 0.70, 0.10, 0.10]
/// ```
pub fn spread_weight_probabilities(
    min_weight: i32,
    max_weight: i32,
    inhibitory: f64,
    excitatory: f64,
) -> Vec<f64> {
    let neutral = 1.0 - inhibitory - excitatory;
    let (mut inhibitory, mut excitatory) = (inhibitory, excitatory);
    if min_weight >= 0 {
        excitatory += inhibitory;
        inhibitory = 0.0;
    } else if max_weight <= 0 {
        inhibitory += excitatory;
        excitatory = 0.0;
    }

    (min_weight..=max_weight)
        .map(|weight| match weight.signum() {
            -1 => inhibitory / f64::from(-min_weight),
            1 => excitatory / f64::from(max_weight),
            _ => neutral,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_partition_opposite() {
        assert_eq!(Partition::Left.opposite(), Partition::Right);
        assert_eq!(Partition::Right.opposite(), Partition::Left);
    }

    #[test]
    fn test_distribution_rejects_bad_input() {
        assert!(matches!(
            WeightDistribution::new(-1, 1, &[0.5, 0.5]),
            Err(BionnError::ShapeMismatch(_))
        ));
        assert!(matches!(
            WeightDistribution::new(-1, 1, &[0.5, 1.5, 0.0]),
            Err(BionnError::InvalidProbability { .. })
        ));
        assert!(matches!(
            WeightDistribution::new(1, 1, &[1.0]),
            Err(BionnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_distribution_degenerate_mass() {
        let dist = WeightDistribution::new(-1, 1, &[0.0, 0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..100).all(|_| dist.sample(&mut rng) == 1));
        assert_eq!(dist.max_weight(), 1);
    }

    #[test]
    fn test_distribution_missing_mass_yields_zero() {
        let dist = WeightDistribution::new(1, 2, &[0.0, 0.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..50).all(|_| dist.sample(&mut rng) == 0));
    }

    #[test]
    fn test_spread_weight_probabilities() {
        let p = spread_weight_probabilities(-1, 1, 0.05, 0.15);
        assert_eq!(p.len(), 3);
        assert_abs_diff_eq!(p[0], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.80, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 0.15, epsilon = 1e-12);

        let p = spread_weight_probabilities(-2, 2, 0.10, 0.20);
        assert_abs_diff_eq!(p[0], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 0.70, epsilon = 1e-12);
        assert_abs_diff_eq!(p[4], 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_spread_moves_mass_for_one_sided_ranges() {
        let p = spread_weight_probabilities(0, 2, 0.05, 0.15);
        assert_abs_diff_eq!(p[0], 0.80, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 0.10, epsilon = 1e-12);

        let p = spread_weight_probabilities(-2, 0, 0.05, 0.15);
        assert_abs_diff_eq!(p[0], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 0.80, epsilon = 1e-12);
    }
}
