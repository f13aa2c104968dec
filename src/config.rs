/// Configuration management for the media repository
use crate::error::{MediaError, MediaResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// The server name this repository serves media for
    pub hostname: String,
    pub database: DatabaseConfig,
    pub datastores: DatastoreConfig,
    pub timeouts: TimeoutConfig,
    pub thumbnails: ThumbnailConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Datastore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Base path of the default file datastore
    pub default_path: PathBuf,
}

/// Wall-clock bounds for outbound operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per-operation timeout for federated network calls, in seconds
    pub federation: u64,
}

/// Thumbnail generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// MIME types eligible for animated thumbnails
    pub animated_types: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let data_directory = PathBuf::from("./data");
        Self {
            hostname: "localhost".to_string(),
            database: DatabaseConfig {
                path: data_directory.join("media.sqlite"),
            },
            datastores: DatastoreConfig {
                default_path: data_directory.join("media-store"),
            },
            timeouts: TimeoutConfig { federation: 120 },
            thumbnails: ThumbnailConfig {
                animated_types: vec!["image/gif".to_string()],
            },
        }
    }
}

impl MediaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> MediaResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("MEDIA_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

        let data_directory: PathBuf = env::var("MEDIA_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let db_path = env::var("MEDIA_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("media.sqlite"));
        let default_path = env::var("MEDIA_DATASTORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("media-store"));

        let federation = env::var("MEDIA_FEDERATION_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .map_err(|_| MediaError::Validation("Invalid federation timeout".to_string()))?;

        let animated_types = env::var("MEDIA_ANIMATED_TYPES")
            .unwrap_or_else(|_| "image/gif".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            hostname,
            database: DatabaseConfig { path: db_path },
            datastores: DatastoreConfig { default_path },
            timeouts: TimeoutConfig { federation },
            thumbnails: ThumbnailConfig { animated_types },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.hostname.is_empty() {
            return Err(MediaError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.timeouts.federation == 0 {
            return Err(MediaError::Validation(
                "Federation timeout must be at least one second".to_string(),
            ));
        }

        if self.datastores.default_path.as_os_str().is_empty() {
            return Err(MediaError::Validation(
                "Default datastore path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
