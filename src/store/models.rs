/// Persistent data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named destination for persistent bytes
///
/// The identifier is generated once per unique `uri` and stays stable for
/// the lifetime of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub datastore_id: String,
    pub kind: String,
    pub uri: String,
}

/// One stored blob, identified by its origin server and media id
///
/// Media records are created on upload or on first federated fetch and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub origin: String,
    pub media_id: String,
    pub upload_name: Option<String>,
    pub content_type: String,
    pub user_id: Option<String>,
    pub sha256_hash: String,
    pub size_bytes: i64,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// A derivative of a Media record
///
/// At most one thumbnail exists per (media, width, height, method, animated)
/// tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnail {
    pub origin: String,
    pub media_id: String,
    pub width: i64,
    pub height: i64,
    pub method: String,
    pub animated: bool,
    pub content_type: String,
    pub location: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}
