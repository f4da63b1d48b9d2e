//! Storage error types.

use thiserror::Error;

/// Errors that can occur while persisting or loading artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An upscale was saved without a variant index.
    #[error("Upscale metadata requires a variant index")]
    MissingVariantIndex,

    /// The requested artifact does not exist.
    #[error("Artifact not found: {0}")]
    NotFound(String),
}
