//! Dense weight matrix with a transposed copy.
//!
//! `weights[[i, j]]` and `transposed[[j, i]]` always hold the same value, so
//! enumerating a right unit's neighbours is a contiguous row scan instead of
//! a strided column walk.

use super::{check_unit, ConnectionStore, Edge, Partition, WeightDistribution};
use crate::core::{BionnError, BionnResult};
use ndarray::{Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::Rng;

/// Reference connection store: O(1) edge access, O(R)/O(L) neighbour scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseConnections {
    weights: Array2<i32>,
    transposed: Array2<i32>,
}

impl DenseConnections {
    /// Read-only view of the `(left, right)` weight matrix.
    #[must_use]
    pub fn weights(&self) -> ArrayView2<'_, i32> {
        self.weights.view()
    }

    fn sync_transpose(&mut self) {
        self.transposed = self.weights.t().as_standard_layout().into_owned();
    }
}

impl ConnectionStore for DenseConnections {
    fn new(left: usize, right: usize) -> BionnResult<Self> {
        if left == 0 || right == 0 {
            return Err(BionnError::InvalidConfig(format!(
                "both partitions need a positive number of units (got {left}x{right})"
            )));
        }
        let fits = left
            .checked_mul(right)
            .and_then(|edges| edges.checked_mul(std::mem::size_of::<i32>()))
            .is_some_and(|bytes| isize::try_from(bytes).is_ok());
        if !fits {
            return Err(BionnError::InvalidConfig(format!(
                "a {left}x{right} weight matrix does not fit in memory"
            )));
        }
        Ok(Self {
            weights: Array2::zeros((left, right)),
            transposed: Array2::zeros((right, left)),
        })
    }

    fn left_count(&self) -> usize {
        self.weights.nrows()
    }

    fn right_count(&self) -> usize {
        self.weights.ncols()
    }

    fn edge(&self, left: usize, right: usize) -> BionnResult<Edge> {
        check_unit("left unit", left, self.left_count())?;
        check_unit("right unit", right, self.right_count())?;
        Ok(Edge {
            source: left,
            target: right,
            weight: self.weights[[left, right]],
        })
    }

    fn set_edge(&mut self, left: usize, right: usize, weight: i32) -> BionnResult<()> {
        check_unit("left unit", left, self.left_count())?;
        check_unit("right unit", right, self.right_count())?;
        self.weights[[left, right]] = weight;
        self.transposed[[right, left]] = weight;
        Ok(())
    }

    fn neighbours(
        &self,
        unit: usize,
        partition: Partition,
        filter_zero: bool,
    ) -> BionnResult<Box<dyn Iterator<Item = Edge> + '_>> {
        let row = match partition {
            Partition::Left => {
                check_unit("left unit", unit, self.left_count())?;
                self.weights.row(unit)
            }
            Partition::Right => {
                check_unit("right unit", unit, self.right_count())?;
                self.transposed.row(unit)
            }
        };

        Ok(Box::new(row.into_iter().enumerate().filter_map(
            move |(target, &weight)| {
                (!filter_zero || weight != 0).then_some(Edge {
                    source: unit,
                    target,
                    weight,
                })
            },
        )))
    }

    fn non_zero_count(&self) -> usize {
        self.weights.iter().filter(|&&w| w != 0).count()
    }

    /// Draws the whole matrix in one `ndarray-rand` pass (row-major, same
    /// draw order as the per-edge default) and rebuilds the transpose.
    fn fill<R: Rng>(&mut self, distribution: &WeightDistribution, rng: &mut R) -> BionnResult<usize> {
        self.weights = Array2::random_using(self.weights.dim(), distribution, rng);
        self.sync_transpose();
        Ok(self.non_zero_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_new_rejects_empty_partition() {
        assert!(DenseConnections::new(0, 3).is_err());
        assert!(DenseConnections::new(3, 0).is_err());
        assert!(matches!(
            DenseConnections::new(usize::MAX, 2),
            Err(BionnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_set_edge_keeps_transpose_in_sync() {
        let mut store = DenseConnections::new(3, 2).unwrap();
        store.set_edge(2, 1, -1).unwrap();

        let from_left: Vec<Edge> = store.neighbours(2, Partition::Left, true).unwrap().collect();
        let from_right: Vec<Edge> = store.neighbours(1, Partition::Right, true).unwrap().collect();
        assert_eq!(from_left, vec![Edge { source: 2, target: 1, weight: -1 }]);
        assert_eq!(from_right, vec![Edge { source: 1, target: 2, weight: -1 }]);
    }

    #[test]
    fn test_neighbours_without_filter_lists_zero_edges() {
        let mut store = DenseConnections::new(2, 4).unwrap();
        store.set_edge(0, 3, 1).unwrap();
        assert_eq!(store.neighbours(0, Partition::Left, false).unwrap().count(), 4);
        assert_eq!(store.neighbours(0, Partition::Left, true).unwrap().count(), 1);
    }

    #[test]
    fn test_bounds() {
        let store = DenseConnections::new(5, 5).unwrap();
        assert!(matches!(store.edge(5, 0), Err(BionnError::OutOfBounds { .. })));
        assert!(matches!(store.edge(0, 5), Err(BionnError::OutOfBounds { .. })));
        assert!(store.neighbours(5, Partition::Right, true).is_err());
        assert!(store.edge(4, 4).is_ok());
    }

    #[test]
    fn test_fill_matches_transpose() {
        let mut store = DenseConnections::new(6, 4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let created = store.initialize(-1, 1, &[0.3, 0.4, 0.3], &mut rng).unwrap();
        assert_eq!(created, store.non_zero_count());

        for i in 0..6 {
            for edge in store.neighbours(i, Partition::Left, false).unwrap() {
                let back: Vec<Edge> = store
                    .neighbours(edge.target, Partition::Right, false)
                    .unwrap()
                    .filter(|e| e.target == i)
                    .collect();
                assert_eq!(back[0].weight, edge.weight);
            }
        }
    }
}
