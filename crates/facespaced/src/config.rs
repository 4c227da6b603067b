use facespace_core::database::{DEFAULT_FACE_HEIGHT, DEFAULT_FACE_WIDTH};
use facespace_core::DatabaseConfig;
use std::path::PathBuf;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the database document.
    pub db_path: PathBuf,
    /// Face width for a freshly created database.
    pub face_width: u32,
    /// Face height for a freshly created database.
    pub face_height: u32,
    /// Bus to serve on (default: session).
    pub bus: BusKind,
    /// Write the database back to `db_path` after every mutation.
    pub autosave: bool,
}

impl Config {
    /// Load configuration from `FACESPACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let db_path = std::env::var("FACESPACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facespace_core::default_db_path());

        let bus = std::env::var("FACESPACE_BUS")
            .ok()
            .and_then(|v| {
                let parsed = BusKind::parse(&v);
                if parsed.is_none() {
                    tracing::warn!(value = %v, "unknown FACESPACE_BUS; using session bus");
                }
                parsed
            })
            .unwrap_or(BusKind::Session);

        Self {
            db_path,
            face_width: env_u32("FACESPACE_FACE_WIDTH", DEFAULT_FACE_WIDTH),
            face_height: env_u32("FACESPACE_FACE_HEIGHT", DEFAULT_FACE_HEIGHT),
            bus,
            autosave: std::env::var("FACESPACE_AUTOSAVE")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            face_width: self.face_width,
            face_height: self.face_height,
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_kind_parse() {
        assert_eq!(BusKind::parse("session"), Some(BusKind::Session));
        assert_eq!(BusKind::parse(" System "), Some(BusKind::System));
        assert_eq!(BusKind::parse("tcp"), None);
    }

    #[test]
    fn test_env_u32_falls_back() {
        assert_eq!(env_u32("FACESPACE_TEST_UNSET_VARIABLE", 92), 92);
    }
}
