//! Per-unit activation thresholds with optional activity-driven adaptation.
//!
//! Each unit tracks an exponential moving average of how often it fires.
//! Units that almost never fire get their threshold lowered, units that
//! fire most of the time get it raised, both within `[base / 2, base * 2]`.

use super::{Activations, BionnError, BionnResult, Network};
use crate::connections::ConnectionStore;
use itertools::Itertools;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// EMA smoothing factor for unit activity.
pub const ACTIVITY_ALPHA: f64 = 0.05;
/// Average activity below which a threshold is lowered.
pub const LOW_ACTIVITY: f64 = 0.01;
/// Average activity above which a threshold is raised.
pub const HIGH_ACTIVITY: f64 = 0.5;
/// Activity average a unit starts from, and returns to after adapting.
pub const RESET_ACTIVITY: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    base: i32,
    /// `individual[layer][unit]`
    individual: Vec<Vec<i32>>,
    /// `averages[layer][unit]`, EMA of the unit being active
    averages: Vec<Vec<f64>>,
}

#[allow(clippy::must_use_candidate)]
impl Thresholds {
    /// Every unit of every layer starts at `base`.
    pub fn new(base: i32, unit_counts: &[usize]) -> Self {
        Self {
            base,
            individual: unit_counts.iter().map(|&n| vec![base; n]).collect(),
            averages: unit_counts.iter().map(|&n| vec![RESET_ACTIVITY; n]).collect(),
        }
    }

    pub fn base(&self) -> i32 {
        self.base
    }

    pub fn layer(&self, layer: usize) -> Option<&[i32]> {
        self.individual.get(layer).map(Vec::as_slice)
    }

    pub fn get(&self, layer: usize, unit: usize) -> Option<i32> {
        self.individual.get(layer)?.get(unit).copied()
    }

    /// # Errors
    /// - `OutOfBounds` if `layer` or `unit` is out of range
    pub fn set(&mut self, layer: usize, unit: usize, value: i32) -> BionnResult<()> {
        let layers = self.individual.len();
        let row = self.individual.get_mut(layer).ok_or(BionnError::OutOfBounds {
            what: "layer",
            index: layer,
            len: layers,
        })?;
        let len = row.len();
        let slot = row.get_mut(unit).ok_or(BionnError::OutOfBounds {
            what: "unit",
            index: unit,
            len,
        })?;
        *slot = value;
        Ok(())
    }

    pub fn averages(&self, layer: usize) -> Option<&[f64]> {
        self.averages.get(layer).map(Vec::as_slice)
    }

    /// Units of `layer` whose counter reached their threshold.
    pub(crate) fn activated(&self, layer: usize, counters: &[AtomicI32]) -> Activations {
        let Some(thresholds) = self.individual.get(layer) else {
            return Vec::new();
        };
        counters
            .iter()
            .zip(thresholds)
            .positions(|(counter, &threshold)| counter.load(Ordering::Relaxed) >= threshold)
            .collect()
    }

    /// Fold one observation of `layer`'s active set into the activity averages.
    ///
    /// # Errors
    /// - `OutOfBounds` if `layer` or a unit in `active` is out of range
    pub fn record(&mut self, layer: usize, active: &[usize]) -> BionnResult<()> {
        let layers = self.averages.len();
        let averages = self.averages.get_mut(layer).ok_or(BionnError::OutOfBounds {
            what: "layer",
            index: layer,
            len: layers,
        })?;
        let len = averages.len();
        let mut on = vec![false; len];
        for &unit in active {
            *on.get_mut(unit).ok_or(BionnError::OutOfBounds {
                what: "unit",
                index: unit,
                len,
            })? = true;
        }

        for (average, fired) in averages.iter_mut().zip(on) {
            let observed = if fired { 1.0 } else { 0.0 };
            *average += ACTIVITY_ALPHA * (observed - *average);
        }
        Ok(())
    }

    /// Step every threshold whose unit is persistently silent or saturated.
    ///
    /// Returns the number of thresholds changed.
    pub fn adapt(&mut self) -> usize {
        let (low, high) = (self.base / 2, self.base * 2);
        let mut changed = 0;
        for (thresholds, averages) in self.individual.iter_mut().zip(&mut self.averages) {
            for (threshold, average) in thresholds.iter_mut().zip(averages.iter_mut()) {
                if *average < LOW_ACTIVITY && *threshold > low {
                    *threshold -= 1;
                } else if *average > HIGH_ACTIVITY && *threshold < high {
                    *threshold += 1;
                } else {
                    continue;
                }
                *average = RESET_ACTIVITY;
                changed += 1;
            }
        }
        changed
    }

    /// Restore every threshold to `base` and every average to its start value.
    pub fn reset(&mut self) {
        for row in &mut self.individual {
            row.fill(self.base);
        }
        for row in &mut self.averages {
            row.fill(RESET_ACTIVITY);
        }
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (layer, row) in self.individual.iter().enumerate() {
            writeln!(f, "layer{layer} = [{}];", row.iter().join(" "))?;
        }
        Ok(())
    }
}

impl<S: ConnectionStore> Network<S> {
    /// Record that `active` fired in `layer`.
    ///
    /// # Errors
    /// See [`Thresholds::record`].
    pub fn record_activity(&mut self, layer: usize, active: &[usize]) -> BionnResult<()> {
        self.thresholds.record(layer, active)
    }

    /// Apply the adaptation rule to every unit. Returns the number changed.
    pub fn adapt_thresholds(&mut self) -> usize {
        self.thresholds.adapt()
    }

    /// One `layer{n} = [..];` line per layer.
    #[must_use]
    pub fn thresholds_to_string(&self) -> String {
        self.thresholds.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let thresholds = Thresholds::new(3, &[2, 1]);
        assert_eq!(thresholds.layer(0), Some(&[3, 3][..]));
        assert_eq!(thresholds.get(1, 0), Some(3));
        assert_eq!(thresholds.get(1, 1), None);
        assert_eq!(thresholds.averages(1), Some(&[RESET_ACTIVITY][..]));
    }

    #[test]
    fn test_activated_compares_counters() {
        let mut thresholds = Thresholds::new(2, &[3]);
        thresholds.set(0, 2, 5).unwrap();
        let counters: Vec<AtomicI32> = [2, 1, 4].into_iter().map(AtomicI32::new).collect();
        assert_eq!(thresholds.activated(0, &counters), vec![0]);
        assert!(thresholds.activated(4, &counters).is_empty());
    }

    #[test]
    fn test_record_moves_average() {
        let mut thresholds = Thresholds::new(2, &[2]);
        thresholds.record(0, &[1]).unwrap();
        let averages = thresholds.averages(0).unwrap();
        assert!((averages[0] - 0.095).abs() < 1e-12);
        assert!((averages[1] - 0.145).abs() < 1e-12);
        assert!(thresholds.record(0, &[2]).is_err());
        assert!(thresholds.record(1, &[]).is_err());
    }

    #[test]
    fn test_adapt_lowers_silent_and_raises_busy_units() {
        let mut thresholds = Thresholds::new(4, &[2]);
        for _ in 0..200 {
            thresholds.record(0, &[1]).unwrap();
        }
        assert_eq!(thresholds.adapt(), 2);
        assert_eq!(thresholds.layer(0), Some(&[3, 5][..]));
        assert_eq!(thresholds.averages(0), Some(&[RESET_ACTIVITY, RESET_ACTIVITY][..]));
    }

    #[test]
    fn test_adapt_respects_bounds() {
        let mut thresholds = Thresholds::new(4, &[1]);
        thresholds.set(0, 0, 2).unwrap();
        for _ in 0..200 {
            thresholds.record(0, &[]).unwrap();
        }
        assert_eq!(thresholds.adapt(), 0);
        assert_eq!(thresholds.get(0, 0), Some(2));

        thresholds.reset();
        assert_eq!(thresholds.get(0, 0), Some(4));
    }

    #[test]
    fn test_display() {
        let mut thresholds = Thresholds::new(3, &[3, 2]);
        thresholds.set(1, 1, 4).unwrap();
        assert_eq!(thresholds.to_string(), "layer0 = [3 3 3];\nlayer1 = [3 4];\n");
    }
}
