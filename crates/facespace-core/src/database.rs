//! Face database manager.
//!
//! Owns the sample store and the current eigenspace model behind a single
//! reader-writer lock. Mutations (`add_sample`, `rebuild`, `load_from_path`)
//! take the write lock for their whole duration; queries take the read lock
//! and see the store, model and threshold of one generation together.
//!
//! Adding samples never rebuilds the model. The store and model carry
//! generation counters so a model built before the latest additions is
//! reported as [`DatabaseState::Stale`] until the next [`FaceDatabase::rebuild`].

use crate::imaging::{self, FaceImage, ImageError, RawImage};
use crate::model::{EigenModel, ModelError};
use crate::persist::{self, DatabaseDocument, PersistError};
use crate::store::SampleStore;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_FACE_WIDTH: u32 = 92;
pub const DEFAULT_FACE_HEIGHT: u32 = 112;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("no model has been built yet")]
    ModelNotReady,
    #[error("label {label:?} has {count} samples, index {index} is out of range")]
    IndexOutOfRange {
        label: String,
        index: usize,
        count: usize,
    },
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistError),
    #[error("threshold must be finite, got {0}")]
    InvalidThreshold(f64),
}

/// Fixed face geometry every stored sample is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub face_width: u32,
    pub face_height: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            face_width: DEFAULT_FACE_WIDTH,
            face_height: DEFAULT_FACE_HEIGHT,
        }
    }
}

/// Lifecycle of the store relative to its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseState {
    /// No samples, no model.
    Empty,
    /// Samples present, never rebuilt.
    Populated,
    /// Model matches the current store.
    Ready,
    /// Model exists but samples were added after it was built.
    Stale,
}

/// Outcome of classifying a probe image.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Accepted label, or `None` when the nearest sample is beyond the threshold.
    pub label: Option<String>,
    /// Label of the nearest training sample, accepted or not.
    pub nearest: String,
    pub distance: f64,
    pub threshold: f64,
}

/// Counters and settings read together under one lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSummary {
    pub state: DatabaseState,
    pub samples: usize,
    pub labels: usize,
    pub face_width: u32,
    pub face_height: u32,
    /// Requested by the last rebuild (zero = all).
    pub components: usize,
    /// Actually kept by the current model.
    pub model_components: Option<usize>,
    pub threshold: f64,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        self.label.is_some()
    }
}

struct Inner {
    config: DatabaseConfig,
    store: SampleStore,
    components: usize,
    threshold: f64,
    model: Option<Arc<EigenModel>>,
    /// Bumped on every store mutation.
    store_generation: u64,
    /// Store generation the current model was built from.
    model_generation: Option<u64>,
}

impl Inner {
    fn state(&self) -> DatabaseState {
        match self.model_generation {
            Some(g) if g == self.store_generation => DatabaseState::Ready,
            Some(_) => DatabaseState::Stale,
            None if self.store.is_empty() => DatabaseState::Empty,
            None => DatabaseState::Populated,
        }
    }
}

/// Labeled face database with an eigenface classifier.
pub struct FaceDatabase {
    inner: RwLock<Inner>,
}

impl Default for FaceDatabase {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

impl FaceDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config,
                store: SampleStore::new(),
                components: 0,
                threshold: 0.0,
                model: None,
                store_generation: 0,
                model_generation: None,
            }),
        }
    }

    /// Open a database document, rebuilding its model.
    pub fn from_path(path: &Path) -> Result<Self, DatabaseError> {
        let db = Self::default();
        db.load_from_path(path)?;
        Ok(db)
    }

    /// Normalize `raw` and append it under `label`. Does not rebuild.
    pub fn add_sample(&self, raw: &RawImage, label: &str) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write();
        let face = imaging::normalize(raw, inner.config.face_width, inner.config.face_height)?;
        inner.store.push(face, label);
        inner.store_generation += 1;

        tracing::debug!(
            label,
            samples = inner.store.len(),
            state = ?inner.state(),
            "sample added"
        );
        Ok(())
    }

    /// Rebuild the model from every stored sample and recalibrate the
    /// threshold to the model's self-distance. Returns the new threshold.
    ///
    /// `components` of zero, or above the sample count, keeps all samples'
    /// worth of components. On failure the previous model stays in place.
    pub fn rebuild(&self, components: usize) -> Result<f64, DatabaseError> {
        let mut inner = self.inner.write();
        if inner.store.is_empty() {
            return Err(ModelError::EmptyModel.into());
        }

        let (images, labels) = inner.store.split();
        let model = EigenModel::compute(&images, &labels, components)?;
        let threshold = model.self_distance()?;

        inner.components = components;
        inner.threshold = threshold;
        inner.model = Some(Arc::new(model));
        inner.model_generation = Some(inner.store_generation);

        tracing::info!(
            samples = inner.store.len(),
            labels = inner.store.distinct_label_count(),
            requested_components = components,
            threshold,
            "database rebuilt"
        );
        Ok(threshold)
    }

    /// Label of the nearest training face, or `None` when it lies beyond the
    /// recognition threshold.
    pub fn classify(&self, raw: &RawImage) -> Result<Option<String>, DatabaseError> {
        Ok(self.classify_detailed(raw)?.label)
    }

    /// Classification with the nearest label, its distance and the threshold
    /// it was judged against.
    pub fn classify_detailed(&self, raw: &RawImage) -> Result<Classification, DatabaseError> {
        let (model, config, threshold, state) = {
            let inner = self.inner.read();
            let model = inner.model.clone().ok_or(DatabaseError::ModelNotReady)?;
            (model, inner.config, inner.threshold, inner.state())
        };

        if state == DatabaseState::Stale {
            tracing::debug!("classifying against a model older than the sample store");
        }

        let face = imaging::normalize(raw, config.face_width, config.face_height)?;
        let prediction = model.predict(&face.pixels)?;

        let label = if prediction.distance > threshold {
            tracing::debug!(
                nearest = %prediction.label,
                distance = prediction.distance,
                threshold,
                "no match"
            );
            None
        } else {
            Some(prediction.label.clone())
        };

        Ok(Classification {
            label,
            nearest: prediction.label,
            distance: prediction.distance,
            threshold,
        })
    }

    /// Normalize `raw` to the database face size without storing it.
    pub fn normalize(&self, raw: &RawImage) -> Result<FaceImage, DatabaseError> {
        let config = self.inner.read().config;
        Ok(imaging::normalize(raw, config.face_width, config.face_height)?)
    }

    pub fn summary(&self) -> DatabaseSummary {
        let inner = self.inner.read();
        DatabaseSummary {
            state: inner.state(),
            samples: inner.store.len(),
            labels: inner.store.distinct_label_count(),
            face_width: inner.config.face_width,
            face_height: inner.config.face_height,
            components: inner.components,
            model_components: inner.model.as_ref().map(|m| m.components()),
            threshold: inner.threshold,
        }
    }

    pub fn distinct_label_count(&self) -> usize {
        self.inner.read().store.distinct_label_count()
    }

    /// Unique labels in lexicographic order.
    pub fn distinct_labels(&self) -> Vec<String> {
        self.inner.read().store.distinct_labels()
    }

    pub fn sample_count_for_label(&self, label: &str) -> usize {
        self.inner.read().store.count_for_label(label)
    }

    pub fn sample_count(&self) -> usize {
        self.inner.read().store.len()
    }

    /// The `index`-th stored image for `label`, counting in insertion order.
    pub fn sample_image(&self, label: &str, index: usize) -> Result<FaceImage, DatabaseError> {
        let inner = self.inner.read();
        inner
            .store
            .image_for_label(label, index)
            .cloned()
            .ok_or_else(|| DatabaseError::IndexOutOfRange {
                label: label.to_string(),
                index,
                count: inner.store.count_for_label(label),
            })
    }

    pub fn image_width(&self) -> u32 {
        self.inner.read().config.face_width
    }

    pub fn image_height(&self) -> u32 {
        self.inner.read().config.face_height
    }

    pub fn config(&self) -> DatabaseConfig {
        self.inner.read().config
    }

    pub fn threshold(&self) -> f64 {
        self.inner.read().threshold
    }

    /// Override the recognition threshold until the next rebuild.
    pub fn set_threshold(&self, threshold: f64) -> Result<(), DatabaseError> {
        if !threshold.is_finite() {
            return Err(DatabaseError::InvalidThreshold(threshold));
        }
        self.inner.write().threshold = threshold;
        tracing::info!(threshold, "threshold set");
        Ok(())
    }

    /// Component count requested by the last rebuild (zero = all).
    pub fn components(&self) -> usize {
        self.inner.read().components
    }

    pub fn state(&self) -> DatabaseState {
        self.inner.read().state()
    }

    pub fn is_stale(&self) -> bool {
        self.state() == DatabaseState::Stale
    }

    /// Snapshot of the current model, if one has been built.
    pub fn model(&self) -> Option<Arc<EigenModel>> {
        self.inner.read().model.clone()
    }

    /// Write the store and configuration to `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<(), DatabaseError> {
        let inner = self.inner.read();
        let doc = DatabaseDocument::new(
            inner.config.face_width,
            inner.config.face_height,
            inner.components,
            inner.threshold,
            &inner.store,
        );
        persist::write_document(path, &doc)?;

        tracing::info!(path = %path.display(), samples = inner.store.len(), "database saved");
        Ok(())
    }

    /// Replace the store and configuration with the document at `path` and
    /// rebuild the model from it. The persisted threshold is applied after
    /// the rebuild.
    ///
    /// All parsing, validation and model construction happen before the
    /// current state is touched; on any error the database is unchanged.
    pub fn load_from_path(&self, path: &Path) -> Result<(), DatabaseError> {
        let loaded = persist::read_document(path)?.into_loaded()?;

        let model = if loaded.store.is_empty() {
            None
        } else {
            let (images, labels) = loaded.store.split();
            Some(Arc::new(EigenModel::compute(
                &images,
                &labels,
                loaded.num_components,
            )?))
        };

        let mut inner = self.inner.write();
        inner.config = DatabaseConfig {
            face_width: loaded.face_width,
            face_height: loaded.face_height,
        };
        inner.store = loaded.store;
        inner.components = loaded.num_components;
        inner.threshold = loaded.threshold;
        inner.store_generation += 1;
        let generation = inner.store_generation;
        inner.model_generation = model.as_ref().map(|_| generation);
        inner.model = model;

        tracing::info!(
            path = %path.display(),
            samples = inner.store.len(),
            width = inner.config.face_width,
            height = inner.config.face_height,
            threshold = inner.threshold,
            "database loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::PixelFormat;

    fn small_db() -> FaceDatabase {
        FaceDatabase::new(DatabaseConfig {
            face_width: 4,
            face_height: 4,
        })
    }

    fn constant(value: u8) -> RawImage {
        RawImage::gray(4, 4, vec![value; 16]).unwrap()
    }

    fn gradient(offset: u8) -> RawImage {
        let data = (0..16u8).map(|i| i.wrapping_mul(9).wrapping_add(offset)).collect();
        RawImage::gray(4, 4, data).unwrap()
    }

    #[test]
    fn test_three_sample_scenario() {
        let db = small_db();
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(12), "a").unwrap();
        db.add_sample(&constant(200), "b").unwrap();

        assert_eq!(db.distinct_label_count(), 2);
        assert_eq!(db.sample_count_for_label("a"), 2);

        let threshold = db.rebuild(2).unwrap();
        assert!((threshold - 248.0).abs() < 1e-6);

        let c = db.classify_detailed(&constant(200)).unwrap();
        assert_eq!(c.label.as_deref(), Some("b"));
        assert!(c.distance.abs() < 1e-9);
        assert_eq!(db.classify(&constant(200)).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_empty_database_errors() {
        let db = small_db();
        assert_eq!(db.state(), DatabaseState::Empty);
        assert!(matches!(
            db.classify(&constant(1)),
            Err(DatabaseError::ModelNotReady)
        ));
        assert!(matches!(
            db.rebuild(0),
            Err(DatabaseError::Model(ModelError::EmptyModel))
        ));
        assert_eq!(db.state(), DatabaseState::Empty);
    }

    #[test]
    fn test_classify_before_rebuild() {
        let db = small_db();
        db.add_sample(&constant(1), "a").unwrap();
        assert_eq!(db.state(), DatabaseState::Populated);
        assert!(matches!(
            db.classify(&constant(1)),
            Err(DatabaseError::ModelNotReady)
        ));
    }

    #[test]
    fn test_stale_after_add() {
        let db = small_db();
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(90), "b").unwrap();
        db.rebuild(0).unwrap();
        assert_eq!(db.state(), DatabaseState::Ready);

        db.add_sample(&constant(170), "c").unwrap();
        assert_eq!(db.state(), DatabaseState::Stale);
        assert!(db.is_stale());

        // the committed model still answers, and does not know about "c"
        assert_eq!(db.model().unwrap().sample_count(), 2);
        assert!(db.classify(&constant(10)).unwrap().is_some());

        db.rebuild(0).unwrap();
        assert_eq!(db.state(), DatabaseState::Ready);
        assert_eq!(db.model().unwrap().sample_count(), 3);
    }

    #[test]
    fn test_threshold_rejects_and_accepts() {
        let db = small_db();
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(200), "b").unwrap();
        db.rebuild(0).unwrap();

        let probe = constant(60);
        let c = db.classify_detailed(&probe).unwrap();
        assert_eq!(c.nearest, "a");
        assert!(c.distance > 0.0);

        db.set_threshold(c.distance - 1.0).unwrap();
        assert_eq!(db.classify(&probe).unwrap(), None);

        db.set_threshold(c.distance).unwrap();
        assert_eq!(db.classify(&probe).unwrap().as_deref(), Some("a"));

        db.set_threshold(c.distance * 10.0).unwrap();
        assert_eq!(db.classify(&probe).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_classify_never_exceeds_threshold() {
        let db = small_db();
        for (i, label) in ["a", "b", "c", "a"].iter().enumerate() {
            db.add_sample(&gradient(i as u8 * 40), label).unwrap();
        }
        db.rebuild(0).unwrap();
        db.set_threshold(5.0).unwrap();

        for offset in (0..=250u8).step_by(10) {
            let c = db.classify_detailed(&gradient(offset)).unwrap();
            if c.is_match() {
                assert!(c.distance <= c.threshold);
            } else {
                assert!(c.distance > c.threshold);
            }
        }
    }

    #[test]
    fn test_rebuild_resets_threshold() {
        let db = small_db();
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(50), "b").unwrap();
        let calibrated = db.rebuild(0).unwrap();
        db.set_threshold(1.0).unwrap();
        assert_eq!(db.threshold(), 1.0);
        assert_eq!(db.rebuild(0).unwrap(), calibrated);
        assert_eq!(db.threshold(), calibrated);
    }

    #[test]
    fn test_set_threshold_rejects_nan() {
        let db = small_db();
        assert!(matches!(
            db.set_threshold(f64::NAN),
            Err(DatabaseError::InvalidThreshold(_))
        ));
        assert!(db.set_threshold(f64::INFINITY).is_err());
    }

    #[test]
    fn test_rebuild_clamps_components() {
        let db = small_db();
        for v in [10, 40, 90] {
            db.add_sample(&constant(v), "x").unwrap();
        }
        db.rebuild(0).unwrap();
        assert_eq!(db.model().unwrap().components(), 3);
        db.rebuild(17).unwrap();
        assert_eq!(db.model().unwrap().components(), 3);
        db.rebuild(1).unwrap();
        assert_eq!(db.model().unwrap().components(), 1);
    }

    #[test]
    fn test_sample_image_lookup() {
        let db = small_db();
        db.add_sample(&constant(1), "a").unwrap();
        db.add_sample(&constant(2), "b").unwrap();
        db.add_sample(&constant(3), "a").unwrap();

        let img = db.sample_image("a", 1).unwrap();
        assert_eq!(img.pixels, vec![3; 16]);
        assert_eq!((img.width, img.height), (4, 4));

        match db.sample_image("a", 2) {
            Err(DatabaseError::IndexOutOfRange { label, index, count }) => {
                assert_eq!(label, "a");
                assert_eq!(index, 2);
                assert_eq!(count, 2);
            }
            other => panic!("expected IndexOutOfRange, got {other:?}"),
        }
        assert!(db.sample_image("nobody", 0).is_err());
    }

    #[test]
    fn test_add_sample_normalizes() {
        let db = small_db();
        let color = RawImage::new(8, 8, PixelFormat::Rgb24, [100u8, 100, 100].repeat(64)).unwrap();
        db.add_sample(&color, "c").unwrap();
        let img = db.sample_image("c", 0).unwrap();
        assert_eq!(img.pixels.len(), 16);
        assert!(img.pixels.iter().all(|&p| p == 100));
    }

    #[test]
    fn test_summary_reflects_one_generation() {
        let db = small_db();
        let summary = db.summary();
        assert_eq!(summary.state, DatabaseState::Empty);
        assert_eq!(summary.model_components, None);

        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(200), "b").unwrap();
        let threshold = db.rebuild(0).unwrap();
        db.add_sample(&constant(12), "a").unwrap();

        let summary = db.summary();
        assert_eq!(summary.state, DatabaseState::Stale);
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.labels, 2);
        assert_eq!((summary.face_width, summary.face_height), (4, 4));
        assert_eq!(summary.components, 0);
        assert_eq!(summary.model_components, Some(2));
        assert_eq!(summary.threshold, threshold);
    }

    #[test]
    fn test_normalize_does_not_store() {
        let db = small_db();
        let raw = RawImage::new(8, 8, PixelFormat::Rgb24, vec![100; 8 * 8 * 3]).unwrap();

        let face = db.normalize(&raw).unwrap();
        assert_eq!((face.width, face.height), (4, 4));
        assert!(face.pixels.iter().all(|&p| p == 100));
        assert_eq!(db.sample_count(), 0);
        assert_eq!(db.state(), DatabaseState::Empty);
    }

    #[test]
    fn test_unsupported_format_tag() {
        let err: DatabaseError = PixelFormat::from_tag("unknown").unwrap_err().into();
        assert!(matches!(
            err,
            DatabaseError::Image(ImageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_default_geometry() {
        let db = FaceDatabase::default();
        assert_eq!(db.image_width(), 92);
        assert_eq!(db.image_height(), 112);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");

        let db = small_db();
        db.add_sample(&gradient(0), "alice").unwrap();
        db.add_sample(&gradient(30), "bob").unwrap();
        db.add_sample(&gradient(60), "alice").unwrap();
        db.add_sample(&gradient(90), "bob").unwrap();
        db.add_sample(&gradient(120), "alice").unwrap();
        db.rebuild(3).unwrap();
        db.set_threshold(1234.5).unwrap();
        db.save_to_path(&path).unwrap();

        let restored = FaceDatabase::from_path(&path).unwrap();
        assert_eq!(restored.distinct_labels(), db.distinct_labels());
        assert_eq!(restored.sample_count_for_label("alice"), 3);
        assert_eq!(restored.sample_count_for_label("bob"), 2);
        assert_eq!(restored.image_width(), 4);
        assert_eq!(restored.image_height(), 4);
        assert_eq!(restored.threshold(), 1234.5);
        assert_eq!(restored.components(), 3);
        assert_eq!(restored.state(), DatabaseState::Ready);

        restored.rebuild(0).unwrap();
        assert_eq!(
            restored.classify(&gradient(90)).unwrap().as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn test_load_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        small_db().save_to_path(&path).unwrap();

        let db = FaceDatabase::from_path(&path).unwrap();
        assert_eq!(db.state(), DatabaseState::Empty);
        assert_eq!(db.image_width(), 4);
    }

    #[test]
    fn test_failed_load_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"faceWidth\": 4").unwrap();

        let db = small_db();
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(20), "b").unwrap();
        db.rebuild(0).unwrap();
        let threshold = db.threshold();

        assert!(matches!(
            db.load_from_path(&path),
            Err(DatabaseError::Persistence(_))
        ));
        assert!(matches!(
            db.load_from_path(&dir.path().join("missing.json")),
            Err(DatabaseError::Persistence(PersistError::Io { .. }))
        ));

        assert_eq!(db.sample_count(), 2);
        assert_eq!(db.threshold(), threshold);
        assert_eq!(db.state(), DatabaseState::Ready);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let db = Arc::new(small_db());
        db.add_sample(&constant(10), "a").unwrap();
        db.add_sample(&constant(200), "b").unwrap();
        db.rebuild(0).unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                let db = Arc::clone(&db);
                s.spawn(move || {
                    for _ in 0..50 {
                        let c = db.classify_detailed(&constant(10)).unwrap();
                        assert_eq!(c.nearest, "a");
                    }
                });
            }
            let writer = Arc::clone(&db);
            s.spawn(move || {
                for i in 0..10u8 {
                    writer.add_sample(&constant(100 + i), "c").unwrap();
                    writer.rebuild(0).unwrap();
                }
            });
        });

        assert_eq!(db.sample_count(), 12);
        assert_eq!(db.state(), DatabaseState::Ready);
    }
}
