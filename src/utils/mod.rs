//! Vector helpers shared by training, generation and inspection.
//!
//! Activation sets are index lists; the contrastive-divergence maths works on
//! dense probability vectors. These helpers convert between the two and
//! compute the products and distances the training loops need.

pub mod random;

pub use random::RandomSource;

use ndarray::{Array1, Array2, Axis};
use std::collections::HashSet;

/// Dense 0/1 vector with ones at the active indices.
///
/// Indices outside `len` are ignored.
pub fn indicator(active: &[usize], len: usize) -> Array1<f64> {
    let mut v = Array1::zeros(len);
    for &unit in active {
        if unit < len {
            v[unit] = 1.0;
        }
    }
    v
}

/// Outer product `a ⊗ b`, shape `(a.len(), b.len())`.
pub fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    &col * &row
}

/// Fraction of draws in which each unit was active.
///
/// ```text
/// p[i] = |{ d ∈ draws : i ∈ d }| / |draws|
/// ```
pub fn estimate_probabilities(draws: &[Vec<usize>], len: usize) -> Array1<f64> {
    let mut probabilities = Array1::zeros(len);
    if draws.is_empty() {
        return probabilities;
    }
    let step = 1.0 / draws.len() as f64;
    for draw in draws {
        for &unit in draw {
            if unit < len {
                probabilities[unit] += step;
            }
        }
    }
    probabilities
}

/// Size of the symmetric difference of two activation sets.
pub fn symmetric_difference(a: &[usize], b: &[usize]) -> usize {
    let a: HashSet<usize> = a.iter().copied().collect();
    let b: HashSet<usize> = b.iter().copied().collect();
    a.symmetric_difference(&b).count()
}

/// Sum of squared element differences.
pub fn squared_error(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance between two integer weight vectors.
pub fn euclidean_distance(a: &[i32], b: &[i32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
