//! Multi-attempt classification and test-set evaluation.
//!
//! ## Overview
//!
//! A single feed-forward pass is noisy, so classification repeats it a fixed
//! number of times and lets the passes vote:
//!
//! ```text
//! for each attempt:
//!     (guess, counts) = classify_with_counts(sample)
//!     guesses[guess] += 1
//!     total_votes    += counts
//! label       = argmax guesses      (ties at random)
//! alternative = argmax total_votes  (ties at random)
//! margin      = top guess count - runner-up guess count
//! ```

use crate::connections::ConnectionStore;
use crate::core::{BionnError, BionnResult, Network};
use crate::data::LabelledSample;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Attempts per sample used when nothing else is configured.
pub const DEFAULT_ATTEMPTS: usize = 20;

/// Outcome of a majority vote over several classification passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Class guessed most often
    pub label: usize,
    /// Class with the most output activations summed over all passes
    pub alternative: usize,
    /// How often each class was the single-pass guess
    pub guesses: Vec<usize>,
    /// Active output units per class, summed over all passes
    pub total_votes: Vec<usize>,
    /// Guess count of the winner minus that of the runner-up
    pub margin: usize,
    /// Mean fraction of the output layer active per pass
    pub activated_fraction: f64,
}

/// Classify `data` `attempts` times and aggregate the passes.
///
/// # Errors
/// - `InvalidConfig` if `attempts` is zero
/// - `OutOfBounds` if `data` is longer than the input layer
pub fn majority_vote<S: ConnectionStore>(
    network: &Network<S>,
    data: &[u8],
    attempts: usize,
) -> BionnResult<Vote> {
    if attempts == 0 {
        return Err(BionnError::InvalidConfig(
            "majority vote needs at least one attempt".to_string(),
        ));
    }
    let classes = network.class_count();
    let output_units = network.unit_count(network.layer_count() - 1)?;
    let mut guesses = vec![0; classes];
    let mut total_votes = vec![0; classes];

    for _ in 0..attempts {
        let (guess, counts) = network.classify_with_counts(data)?;
        guesses[guess] += 1;
        for (total, count) in total_votes.iter_mut().zip(counts) {
            *total += count;
        }
    }

    let label = network.argmax_random_tie(&guesses);
    let runner_up = guesses
        .iter()
        .enumerate()
        .filter(|&(class, _)| class != label)
        .map(|(_, &count)| count)
        .max()
        .unwrap_or(0);

    #[allow(clippy::cast_precision_loss)]
    let activated_fraction =
        total_votes.iter().sum::<usize>() as f64 / (attempts * output_units) as f64;

    Ok(Vote {
        label,
        alternative: network.argmax_random_tie(&total_votes),
        margin: guesses[label] - runner_up,
        guesses,
        total_votes,
        activated_fraction,
    })
}

/// Precision, recall and specificity of one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub precision: f64,
    pub recall: f64,
    pub specificity: f64,
}

/// Test-set accuracy of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub samples: usize,
    /// Fraction of samples whose vote label matches
    pub accuracy: f64,
    /// Fraction of samples whose alternative label matches
    pub alternative_accuracy: f64,
    pub mean_activated_fraction: f64,
    /// `confusion[actual][predicted]`
    pub confusion: Vec<Vec<usize>>,
}

impl Evaluation {
    /// Per-class statistics from the confusion matrix. A ratio with a zero
    /// denominator is reported as 0.
    #[must_use]
    pub fn class_statistics(&self) -> Vec<ClassStatistics> {
        let classes = self.confusion.len();
        let row_totals: Vec<usize> = self.confusion.iter().map(|row| row.iter().sum()).collect();
        let column_totals: Vec<usize> = (0..classes)
            .map(|c| self.confusion.iter().map(|row| row[c]).sum())
            .collect();

        (0..classes)
            .map(|c| {
                let true_positives = self.confusion[c][c];
                let false_negatives = row_totals[c] - true_positives;
                let false_positives = column_totals[c] - true_positives;
                let true_negatives = self.samples + true_positives - row_totals[c] - column_totals[c];
                ClassStatistics {
                    precision: ratio(true_positives, true_positives + false_positives),
                    recall: ratio(true_positives, true_positives + false_negatives),
                    specificity: ratio(true_negatives, true_negatives + false_positives),
                }
            })
            .collect()
    }

    /// Fraction of predictions per class, in class order.
    #[must_use]
    pub fn guess_distribution(&self) -> Vec<f64> {
        let classes = self.confusion.len();
        (0..classes)
            .map(|c| ratio(self.confusion.iter().map(|row| row[c]).sum(), self.samples))
            .collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Majority-vote every sample and tally the results.
///
/// Samples are classified in parallel.
///
/// # Errors
/// - `InvalidConfig` if `attempts` is zero
/// - `OutOfBounds` if a label is not below `class_count` or a sample does
///   not fit the input layer
pub fn evaluate<S: ConnectionStore>(
    network: &Network<S>,
    samples: &[LabelledSample],
    attempts: usize,
) -> BionnResult<Evaluation> {
    let classes = network.class_count();
    if let Some(bad) = samples.iter().find(|s| s.label >= classes) {
        return Err(BionnError::OutOfBounds {
            what: "label",
            index: bad.label,
            len: classes,
        });
    }

    let votes = samples
        .par_iter()
        .map(|sample| majority_vote(network, &sample.sample.data, attempts))
        .collect::<BionnResult<Vec<_>>>()?;

    let mut confusion = vec![vec![0; classes]; classes];
    let mut correct = 0;
    let mut alternative_correct = 0;
    let mut activated = 0.0;
    for (sample, vote) in samples.iter().zip(&votes) {
        confusion[sample.label][vote.label] += 1;
        if vote.label == sample.label {
            correct += 1;
        } else {
            debug!(actual = sample.label, guess = vote.label, margin = vote.margin, "misclassified");
        }
        if vote.alternative == sample.label {
            alternative_correct += 1;
        }
        activated += vote.activated_fraction;
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_activated_fraction = if samples.is_empty() {
        0.0
    } else {
        activated / samples.len() as f64
    };
    let evaluation = Evaluation {
        samples: samples.len(),
        accuracy: ratio(correct, samples.len()),
        alternative_accuracy: ratio(alternative_correct, samples.len()),
        mean_activated_fraction,
        confusion,
    };
    info!(
        samples = evaluation.samples,
        accuracy = evaluation.accuracy,
        alternative_accuracy = evaluation.alternative_accuracy,
        "evaluation complete"
    );
    Ok(evaluation)
}
