use facespace_core::persist::PersistError;
use facespace_core::{DatabaseError, FaceDatabase, FaceImage, PixelFormat, RawImage};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// Image as it crosses the bus: `(width, height, format, pixels)`.
type WireImage = (u32, u32, String, Vec<u8>);

/// D-Bus interface for the FaceSpace daemon.
///
/// Bus name: org.freedesktop.FaceSpace1
/// Object path: /org/freedesktop/FaceSpace1
pub struct FaceSpaceService {
    db: Arc<FaceDatabase>,
    db_path: PathBuf,
    autosave: bool,
    /// Last autosave failure, cleared by the next successful autosave.
    autosave_error: Arc<Mutex<Option<String>>>,
}

impl FaceSpaceService {
    pub fn new(db: Arc<FaceDatabase>, db_path: PathBuf, autosave: bool) -> Self {
        Self {
            db,
            db_path,
            autosave,
            autosave_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` on the blocking pool. Mutating calls persist afterwards when
    /// autosave is on.
    ///
    /// A mutation that succeeded stays applied even if the autosave fails, so
    /// the call still reports success; the failure is logged and surfaced
    /// through `Status`.
    async fn run<T, F>(&self, mutates: bool, op: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FaceDatabase) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let save_to = (mutates && self.autosave).then(|| self.db_path.clone());
        let autosave_error = Arc::clone(&self.autosave_error);

        tokio::task::spawn_blocking(move || {
            let value = op(db.as_ref())?;
            if let Some(path) = save_to {
                match db.save_to_path(&path) {
                    Ok(()) => *autosave_error.lock() = None,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "autosave failed");
                        *autosave_error.lock() = Some(e.to_string());
                    }
                }
            }
            Ok(value)
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?
        .map_err(to_fdo)
    }
}

fn raw_image(width: u32, height: u32, format: &str, data: Vec<u8>) -> Result<RawImage, DatabaseError> {
    let format = PixelFormat::from_tag(format)?;
    Ok(RawImage::new(width, height, format, data)?)
}

fn wire_image(face: FaceImage) -> WireImage {
    (
        face.width,
        face.height,
        PixelFormat::Gray8.tag().to_string(),
        face.pixels,
    )
}

fn to_fdo(err: DatabaseError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "request failed");
    match err {
        DatabaseError::Image(_)
        | DatabaseError::IndexOutOfRange { .. }
        | DatabaseError::InvalidThreshold(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        DatabaseError::Persistence(PersistError::Io { .. }) => {
            zbus::fdo::Error::IOError(err.to_string())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

#[interface(name = "org.freedesktop.FaceSpace1")]
impl FaceSpaceService {
    /// Normalize an image and store it under `label`. Does not rebuild.
    async fn add_sample(
        &self,
        width: u32,
        height: u32,
        format: &str,
        data: Vec<u8>,
        label: &str,
    ) -> zbus::fdo::Result<bool> {
        tracing::info!(label, width, height, format, "add_sample requested");
        let raw = raw_image(width, height, format, data).map_err(to_fdo)?;
        let label = label.to_string();
        self.run(true, move |db| db.add_sample(&raw, &label)).await?;
        Ok(true)
    }

    /// Rebuild the eigenspace model. Non-positive `components` keeps all.
    async fn rebuild(&self, components: i32) -> zbus::fdo::Result<bool> {
        tracing::info!(components, "rebuild requested");
        let components = components.max(0) as usize;
        self.run(true, move |db| db.rebuild(components)).await?;
        Ok(true)
    }

    /// Classify an image. An empty string means no match.
    async fn classify(
        &self,
        width: u32,
        height: u32,
        format: &str,
        data: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let raw = raw_image(width, height, format, data).map_err(to_fdo)?;
        let result = self.run(false, move |db| db.classify_detailed(&raw)).await?;
        tracing::info!(
            nearest = %result.nearest,
            distance = result.distance,
            threshold = result.threshold,
            matched = result.is_match(),
            "classify"
        );
        Ok(result.label.unwrap_or_default())
    }

    async fn distinct_label_count(&self) -> zbus::fdo::Result<u32> {
        self.run(false, |db| Ok(db.distinct_label_count() as u32))
            .await
    }

    async fn distinct_labels(&self) -> zbus::fdo::Result<Vec<String>> {
        self.run(false, |db| Ok(db.distinct_labels())).await
    }

    async fn sample_count_for_label(&self, label: &str) -> zbus::fdo::Result<u32> {
        let label = label.to_string();
        self.run(false, move |db| Ok(db.sample_count_for_label(&label) as u32))
            .await
    }

    /// Stored image as `(width, height, format, pixels)`.
    async fn sample_image(&self, label: &str, index: u32) -> zbus::fdo::Result<WireImage> {
        let label = label.to_string();
        let img = self
            .run(false, move |db| db.sample_image(&label, index as usize))
            .await?;
        Ok(wire_image(img))
    }

    /// Normalize an image to the face size without storing it, so a client
    /// can see exactly what training and classification operate on.
    async fn normalize_image(
        &self,
        width: u32,
        height: u32,
        format: &str,
        data: Vec<u8>,
    ) -> zbus::fdo::Result<WireImage> {
        let raw = raw_image(width, height, format, data).map_err(to_fdo)?;
        let face = self.run(false, move |db| db.normalize(&raw)).await?;
        Ok(wire_image(face))
    }

    async fn image_width(&self) -> zbus::fdo::Result<u32> {
        self.run(false, |db| Ok(db.image_width())).await
    }

    async fn image_height(&self) -> zbus::fdo::Result<u32> {
        self.run(false, |db| Ok(db.image_height())).await
    }

    async fn get_threshold(&self) -> zbus::fdo::Result<f64> {
        self.run(false, |db| Ok(db.threshold())).await
    }

    async fn set_threshold(&self, threshold: f64) -> zbus::fdo::Result<()> {
        self.run(true, move |db| db.set_threshold(threshold)).await
    }

    async fn load_from_path(&self, path: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(path, "load requested");
        let path = PathBuf::from(path);
        self.run(false, move |db| db.load_from_path(&path)).await?;
        Ok(true)
    }

    async fn save_to_path(&self, path: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(path, "save requested");
        let path = PathBuf::from(path);
        self.run(false, move |db| db.save_to_path(&path)).await?;
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let summary = self.run(false, |db| Ok(db.summary())).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": summary,
            "db_path": self.db_path.display().to_string(),
            "autosave": self.autosave,
            "autosave_error": self.autosave_error.lock().clone(),
        })
        .to_string())
    }
}
