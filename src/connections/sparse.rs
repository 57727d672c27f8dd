//! Adjacency-list store holding only non-zero weights.
//!
//! Suited to very sparse connectivity where most of the `L × R` matrix stays
//! zero. Both directions are indexed so that neighbour enumeration from
//! either partition touches only the incident edges.

use super::{check_unit, ConnectionStore, Edge, Partition};
use crate::core::{BionnError, BionnResult};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseConnections {
    /// `rows[i]`: right unit → weight, for left unit `i`
    rows: Vec<BTreeMap<usize, i32>>,
    /// `columns[j]`: left unit → weight, for right unit `j`
    columns: Vec<BTreeMap<usize, i32>>,
}

impl SparseConnections {
    fn adjacency(&self, partition: Partition) -> &[BTreeMap<usize, i32>] {
        match partition {
            Partition::Left => &self.rows,
            Partition::Right => &self.columns,
        }
    }
}

impl ConnectionStore for SparseConnections {
    fn new(left: usize, right: usize) -> BionnResult<Self> {
        if left == 0 || right == 0 {
            return Err(BionnError::InvalidConfig(format!(
                "both partitions need a positive number of units (got {left}x{right})"
            )));
        }
        Ok(Self {
            rows: vec![BTreeMap::new(); left],
            columns: vec![BTreeMap::new(); right],
        })
    }

    fn left_count(&self) -> usize {
        self.rows.len()
    }

    fn right_count(&self) -> usize {
        self.columns.len()
    }

    fn edge(&self, left: usize, right: usize) -> BionnResult<Edge> {
        check_unit("left unit", left, self.left_count())?;
        check_unit("right unit", right, self.right_count())?;
        Ok(Edge {
            source: left,
            target: right,
            weight: self.rows[left].get(&right).copied().unwrap_or(0),
        })
    }

    fn set_edge(&mut self, left: usize, right: usize, weight: i32) -> BionnResult<()> {
        check_unit("left unit", left, self.left_count())?;
        check_unit("right unit", right, self.right_count())?;
        if weight == 0 {
            self.rows[left].remove(&right);
            self.columns[right].remove(&left);
        } else {
            self.rows[left].insert(right, weight);
            self.columns[right].insert(left, weight);
        }
        Ok(())
    }

    fn neighbours(
        &self,
        unit: usize,
        partition: Partition,
        filter_zero: bool,
    ) -> BionnResult<Box<dyn Iterator<Item = Edge> + '_>> {
        let what = match partition {
            Partition::Left => "left unit",
            Partition::Right => "right unit",
        };
        check_unit(what, unit, self.partition_size(partition))?;
        let adjacent = &self.adjacency(partition)[unit];

        if filter_zero {
            return Ok(Box::new(adjacent.iter().map(move |(&target, &weight)| Edge {
                source: unit,
                target,
                weight,
            })));
        }

        let other = self.partition_size(partition.opposite());
        Ok(Box::new((0..other).map(move |target| Edge {
            source: unit,
            target,
            weight: adjacent.get(&target).copied().unwrap_or(0),
        })))
    }

    fn non_zero_count(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }
}
