//! Ordered, append-only store of labeled training faces.

use crate::imaging::FaceImage;
use std::collections::BTreeSet;

/// A normalized face and the label it was enrolled under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSample {
    pub image: FaceImage,
    pub label: String,
}

/// Training samples in insertion order. A label may appear many times.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: Vec<FaceSample>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<FaceSample>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, image: FaceImage, label: impl Into<String>) {
        self.samples.push(FaceSample {
            image,
            label: label.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FaceSample> {
        self.samples.iter()
    }

    /// Images and labels as two index-aligned vectors.
    pub fn split(&self) -> (Vec<FaceImage>, Vec<String>) {
        self.samples
            .iter()
            .map(|s| (s.image.clone(), s.label.clone()))
            .unzip()
    }

    /// Unique labels, sorted lexicographically.
    pub fn distinct_labels(&self) -> Vec<String> {
        self.samples
            .iter()
            .map(|s| s.label.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn distinct_label_count(&self) -> usize {
        self.samples
            .iter()
            .map(|s| s.label.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn count_for_label(&self, label: &str) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    /// The `index`-th image (0-based, store order) carrying `label`.
    pub fn image_for_label(&self, label: &str, index: usize) -> Option<&FaceImage> {
        self.samples
            .iter()
            .filter(|s| s.label == label)
            .nth(index)
            .map(|s| &s.image)
    }
}

impl<'a> IntoIterator for &'a SampleStore {
    type Item = &'a FaceSample;
    type IntoIter = std::slice::Iter<'a, FaceSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
