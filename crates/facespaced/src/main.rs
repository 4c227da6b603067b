use anyhow::{Context, Result};
use facespace_core::FaceDatabase;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

use config::{BusKind, Config};
use dbus_interface::FaceSpaceService;

const BUS_NAME: &str = "org.freedesktop.FaceSpace1";
const OBJECT_PATH: &str = "/org/freedesktop/FaceSpace1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facespaced starting");

    let config = Config::from_env();
    let db = open_database(&config)?;
    let service = FaceSpaceService::new(Arc::new(db), config.db_path.clone(), config.autosave);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, path = OBJECT_PATH, "facespaced ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facespaced shutting down");

    Ok(())
}

/// Load the configured database document, or start an empty one.
fn open_database(config: &Config) -> Result<FaceDatabase> {
    if config.db_path.exists() {
        let db = FaceDatabase::from_path(&config.db_path)
            .with_context(|| format!("failed to load {}", config.db_path.display()))?;
        if db.config() != config.database_config() {
            tracing::warn!(
                stored_width = db.image_width(),
                stored_height = db.image_height(),
                configured_width = config.face_width,
                configured_height = config.face_height,
                "face size in database differs from configuration; using the stored size"
            );
        }
        return Ok(db);
    }

    if config.autosave {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    tracing::info!(
        path = %config.db_path.display(),
        width = config.face_width,
        height = config.face_height,
        "no database found; starting empty"
    );
    Ok(FaceDatabase::new(config.database_config()))
}
