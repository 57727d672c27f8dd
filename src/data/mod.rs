//! Samples and the interfaces through which training data reaches the network.
//!
//! ## Overview
//!
//! The engine treats a sample as an opaque vector of byte intensities, one
//! per input unit. Loading images and preprocessing them is left to
//! implementors of [`DataProvider`] and [`Filter`]; this module provides the
//! in-memory and JSON-file providers the CLI and tests use.

use crate::core::{BionnError, BionnResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// An unlabelled input vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub data: Vec<u8>,
}

impl Sample {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A sample with its class label in `0..class_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledSample {
    #[serde(flatten)]
    pub sample: Sample,
    pub label: usize,
}

impl LabelledSample {
    #[must_use]
    pub fn new(data: Vec<u8>, label: usize) -> Self {
        Self {
            sample: Sample::new(data),
            label,
        }
    }
}

/// Common view over labelled and unlabelled samples.
pub trait SampleData {
    fn data(&self) -> &[u8];

    fn label(&self) -> Option<usize>;
}

impl SampleData for Sample {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn label(&self) -> Option<usize> {
        None
    }
}

impl SampleData for LabelledSample {
    fn data(&self) -> &[u8] {
        &self.sample.data
    }

    fn label(&self) -> Option<usize> {
        Some(self.label)
    }
}

/// Drop the labels, e.g. for an unsupervised pass.
#[must_use]
pub fn unlabelled(samples: &[LabelledSample]) -> Vec<Sample> {
    samples.iter().map(|s| s.sample.clone()).collect()
}

/// Source of labelled training and testing data.
pub trait DataProvider {
    fn number_of_classes(&self) -> usize;

    fn training_set(&self) -> &[LabelledSample];

    fn testing_set(&self) -> &[LabelledSample];
}

/// In-place sample transform applied before training.
pub trait Filter {
    /// Factor by which `process` multiplies the sample length.
    fn blowup_factor(&self) -> usize;

    fn process(&self, sample: &mut Sample);
}

/// Run every filter, in order, over every sample.
pub fn apply_filters(filters: &[&dyn Filter], samples: &mut [LabelledSample]) {
    for filter in filters {
        for sample in samples.iter_mut() {
            filter.process(&mut sample.sample);
        }
    }
}

/// Input layer size needed after `filters` have processed samples of `raw_len`.
#[must_use]
pub fn filtered_input_units(filters: &[&dyn Filter], raw_len: usize) -> usize {
    filters.iter().fold(raw_len, |len, f| len * f.blowup_factor())
}

/// Provider over samples already held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryProvider {
    pub classes: usize,
    pub training: Vec<LabelledSample>,
    pub testing: Vec<LabelledSample>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new(classes: usize, training: Vec<LabelledSample>, testing: Vec<LabelledSample>) -> Self {
        Self {
            classes,
            training,
            testing,
        }
    }

    /// Split one sample list into training and testing sets.
    ///
    /// The split is deterministic: the last `testing_fraction` of the
    /// samples become the testing set.
    #[must_use]
    pub fn split(classes: usize, mut samples: Vec<LabelledSample>, testing_fraction: f64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let testing_count = ((samples.len() as f64) * testing_fraction.clamp(0.0, 1.0)) as usize;
        let testing = samples.split_off(samples.len() - testing_count);
        Self::new(classes, samples, testing)
    }

    /// Load a JSON dataset file with `classes`, `training` and `testing`.
    ///
    /// # Errors
    /// - `Io` / `Json` if the file cannot be read or parsed
    /// - `OutOfBounds` if a label is not below `classes`
    pub fn from_json_file(path: impl AsRef<Path>) -> BionnResult<Self> {
        let text = fs::read_to_string(path)?;
        let provider: Self = serde_json::from_str(&text)?;
        provider.validate()?;
        Ok(provider)
    }

    /// # Errors
    /// - `Io` / `Json` on write or encoding failure
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> BionnResult<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    fn validate(&self) -> BionnResult<()> {
        if let Some(bad) = self
            .training
            .iter()
            .chain(&self.testing)
            .find(|s| s.label >= self.classes)
        {
            return Err(BionnError::OutOfBounds {
                what: "label",
                index: bad.label,
                len: self.classes,
            });
        }
        Ok(())
    }
}

impl DataProvider for InMemoryProvider {
    fn number_of_classes(&self) -> usize {
        self.classes
    }

    fn training_set(&self) -> &[LabelledSample] {
        &self.training
    }

    fn testing_set(&self) -> &[LabelledSample] {
        &self.testing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Repeats every byte `factor` times.
    struct Stretch {
        factor: usize,
    }

    impl Filter for Stretch {
        fn blowup_factor(&self) -> usize {
            self.factor
        }

        fn process(&self, sample: &mut Sample) {
            sample.data = sample
                .data
                .iter()
                .flat_map(|&b| std::iter::repeat(b).take(self.factor))
                .collect();
        }
    }

    #[test]
    fn test_sample_data_views() {
        let labelled = LabelledSample::new(vec![1, 2, 3], 2);
        assert_eq!(labelled.data(), &[1, 2, 3]);
        assert_eq!(labelled.label(), Some(2));
        assert_eq!(Sample::new(vec![4]).label(), None);
        assert_eq!(unlabelled(&[labelled]), vec![Sample::new(vec![1, 2, 3])]);
    }

    #[test]
    fn test_filters() {
        let stretch = Stretch { factor: 2 };
        let filters: Vec<&dyn Filter> = vec![&stretch, &stretch];
        let mut samples = vec![LabelledSample::new(vec![7, 9], 0)];
        apply_filters(&filters, &mut samples);
        assert_eq!(samples[0].sample.len(), filtered_input_units(&filters, 2));
        assert_eq!(&samples[0].sample.data[..4], &[7, 7, 7, 7]);
    }

    #[test]
    fn test_split() {
        let samples: Vec<LabelledSample> = (0..10).map(|i| LabelledSample::new(vec![i], 0)).collect();
        let provider = InMemoryProvider::split(1, samples, 0.2);
        assert_eq!(provider.training_set().len(), 8);
        assert_eq!(provider.testing_set()[0].sample.data, vec![8]);
    }

    #[test]
    fn test_json_layout() {
        let json = r#"{"classes": 2, "training": [{"data": [0, 255], "label": 1}], "testing": []}"#;
        let provider: InMemoryProvider = serde_json::from_str(json).unwrap();
        assert_eq!(provider.number_of_classes(), 2);
        assert_eq!(provider.training_set()[0], LabelledSample::new(vec![0, 255], 1));
        assert!(provider.validate().is_ok());

        let bad: InMemoryProvider =
            serde_json::from_str(r#"{"classes": 1, "training": [{"data": [], "label": 1}], "testing": []}"#)
                .unwrap();
        assert!(bad.validate().is_err());
    }
}
