/// Unified error types for the media repository
use thiserror::Error;

/// Main error type for the media repository core
#[derive(Error, Debug)]
pub enum MediaError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Server name parse failures (fatal for the resolving call)
    #[error("Invalid server name: {0}")]
    HostParse(String),

    /// Transient network failures (DNS, HTTP, TCP)
    #[error("Network error: {0}")]
    Network(String),

    /// TLS handshake failures that survived the no-SNI retry
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g. lost an insert race)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown thumbnailing method
    #[error("Unrecognized method: {0}")]
    UnrecognizedMethod(String),

    /// Image decode errors
    #[error("Decode error: {0}")]
    Decode(String),

    /// Image encode errors
    #[error("Encode error: {0}")]
    Encode(String),

    /// Blob persistence errors
    #[error("Persist error: {0}")]
    Persist(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for media repository operations
pub type MediaResult<T> = Result<T, MediaError>;
