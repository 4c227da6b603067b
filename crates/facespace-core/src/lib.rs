//! facespace-core — Eigenface face recognition engine.
//!
//! Builds a PCA subspace ("eigenfaces") over a labeled set of fixed-size
//! grayscale faces and classifies new faces by nearest-neighbor distance
//! in that subspace, rejecting matches beyond a recognition threshold.

pub mod database;
pub mod imaging;
pub mod linalg;
pub mod model;
pub mod persist;
pub mod store;

pub use database::{
    Classification, DatabaseConfig, DatabaseError, DatabaseState, DatabaseSummary, FaceDatabase,
};
pub use imaging::{FaceImage, ImageError, PixelFormat, RawImage};
pub use model::{EigenModel, ModelError, Prediction};
pub use store::{FaceSample, SampleStore};

use std::path::PathBuf;

/// Default location of the database document: `$XDG_DATA_HOME/facespace/faces.json`.
pub fn default_db_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("facespace").join("faces.json")
}
