//! On-disk document for a face database.
//!
//! Only the sample store and its configuration are written. The eigenspace
//! model is always rebuilt from the samples after loading.

use crate::imaging::{FaceImage, PixelFormat};
use crate::store::{FaceSample, SampleStore};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid pixel payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Serialized form of one stored face image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedImage {
    pub cols: u32,
    pub rows: u32,
    pub color_flags: PixelFormat,
    /// Base64 of `cols * rows` intensity bytes, row-major.
    pub raw_pixel_bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFace {
    pub label: String,
    pub image: PersistedImage,
}

/// Top-level persisted database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDocument {
    pub version: u32,
    pub face_width: u32,
    pub face_height: u32,
    /// Requested component count; zero or negative means "all samples".
    pub num_components: i64,
    pub threshold: f64,
    pub faces: Vec<PersistedFace>,
}

/// Validated contents of a [`DatabaseDocument`].
#[derive(Debug, Clone)]
pub struct LoadedDatabase {
    pub face_width: u32,
    pub face_height: u32,
    pub num_components: usize,
    pub threshold: f64,
    pub store: SampleStore,
}

impl DatabaseDocument {
    pub fn new(
        face_width: u32,
        face_height: u32,
        num_components: usize,
        threshold: f64,
        store: &SampleStore,
    ) -> Self {
        let faces = store
            .iter()
            .map(|s| PersistedFace {
                label: s.label.clone(),
                image: PersistedImage {
                    cols: s.image.width,
                    rows: s.image.height,
                    color_flags: PixelFormat::Gray8,
                    raw_pixel_bytes: BASE64.encode(&s.image.pixels),
                },
            })
            .collect();

        Self {
            version: DOCUMENT_VERSION,
            face_width,
            face_height,
            num_components: num_components as i64,
            threshold,
            faces,
        }
    }

    /// Check every invariant of the document and decode the samples.
    pub fn into_loaded(self) -> Result<LoadedDatabase, PersistError> {
        if self.version != DOCUMENT_VERSION {
            return Err(PersistError::Malformed(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.face_width == 0 || self.face_height == 0 {
            return Err(PersistError::Malformed(format!(
                "invalid face size {}x{}",
                self.face_width, self.face_height
            )));
        }
        if !self.threshold.is_finite() {
            return Err(PersistError::Malformed("threshold is not finite".into()));
        }

        let mut samples = Vec::with_capacity(self.faces.len());
        for (i, face) in self.faces.into_iter().enumerate() {
            let img = face.image;
            if img.color_flags != PixelFormat::Gray8 {
                return Err(PersistError::Malformed(format!(
                    "face {i}: stored faces must be gray8, found {}",
                    img.color_flags.tag()
                )));
            }
            if img.cols != self.face_width || img.rows != self.face_height {
                return Err(PersistError::Malformed(format!(
                    "face {i}: size {}x{} differs from database size {}x{}",
                    img.cols, img.rows, self.face_width, self.face_height
                )));
            }
            let pixels = BASE64.decode(img.raw_pixel_bytes.as_bytes())?;
            let expected = img.cols as usize * img.rows as usize;
            if pixels.len() != expected {
                return Err(PersistError::Malformed(format!(
                    "face {i}: expected {expected} pixel bytes, got {}",
                    pixels.len()
                )));
            }
            samples.push(FaceSample {
                image: FaceImage {
                    width: img.cols,
                    height: img.rows,
                    pixels,
                },
                label: face.label,
            });
        }

        Ok(LoadedDatabase {
            face_width: self.face_width,
            face_height: self.face_height,
            num_components: self.num_components.max(0) as usize,
            threshold: self.threshold,
            store: SampleStore::from_samples(samples),
        })
    }
}

/// Read and parse a database document.
pub fn read_document(path: &Path) -> Result<DatabaseDocument, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Write a document, replacing `path` only once the new content is on disk.
pub fn write_document(path: &Path, doc: &DatabaseDocument) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(doc)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(|source| PersistError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), faces = doc.faces.len(), "database document written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SampleStore {
        let mut s = SampleStore::new();
        s.push(FaceImage { width: 2, height: 2, pixels: vec![1, 2, 3, 4] }, "a");
        s.push(FaceImage { width: 2, height: 2, pixels: vec![250, 0, 7, 9] }, "b");
        s
    }

    #[test]
    fn test_document_field_names() {
        let doc = DatabaseDocument::new(2, 2, 3, 1.5, &store());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["faceWidth"], 2);
        assert_eq!(value["faceHeight"], 2);
        assert_eq!(value["numComponents"], 3);
        assert_eq!(value["threshold"], 1.5);
        let img = &value["faces"][0]["image"];
        assert_eq!(img["cols"], 2);
        assert_eq!(img["rows"], 2);
        assert_eq!(img["colorFlags"], "gray8");
        assert_eq!(img["rawPixelBytes"], BASE64.encode([1u8, 2, 3, 4]));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        write_document(&path, &DatabaseDocument::new(2, 2, 0, 12.0, &store())).unwrap();

        let loaded = read_document(&path).unwrap().into_loaded().unwrap();
        assert_eq!(loaded.face_width, 2);
        assert_eq!(loaded.threshold, 12.0);
        assert_eq!(loaded.store.len(), 2);
        assert_eq!(loaded.store.image_for_label("b", 0).unwrap().pixels, vec![250, 0, 7, 9]);
        assert!(!dir.path().join("faces.json.tmp").exists());
    }

    #[test]
    fn test_negative_components_mean_all() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.num_components = -4;
        assert_eq!(doc.into_loaded().unwrap().num_components, 0);
    }

    #[test]
    fn test_rejects_wrong_pixel_count() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.faces[1].image.raw_pixel_bytes = BASE64.encode([1u8, 2, 3]);
        assert!(matches!(doc.into_loaded(), Err(PersistError::Malformed(_))));
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.face_width = 3;
        assert!(matches!(doc.into_loaded(), Err(PersistError::Malformed(_))));
    }

    #[test]
    fn test_rejects_color_faces() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.faces[0].image.color_flags = PixelFormat::Rgb24;
        assert!(matches!(doc.into_loaded(), Err(PersistError::Malformed(_))));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.faces[0].image.raw_pixel_bytes = "not base64!".into();
        assert!(matches!(doc.into_loaded(), Err(PersistError::Base64(_))));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut doc = DatabaseDocument::new(2, 2, 0, 1.0, &store());
        doc.version = 99;
        assert!(matches!(doc.into_loaded(), Err(PersistError::Malformed(_))));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_document(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }

    #[test]
    fn test_read_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "<faces/>").unwrap();
        assert!(matches!(read_document(&path), Err(PersistError::Json(_))));
    }
}
