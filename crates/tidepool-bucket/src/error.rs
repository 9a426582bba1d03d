//! Error types for bucket operations.

use thiserror::Error;

/// Errors that can occur during bucket operations.
#[derive(Debug, Error)]
pub enum BucketError {
    /// Bucket file not found.
    #[error("bucket not found: {0}")]
    NotFound(String),

    /// Bucket hash mismatch.
    #[error("bucket hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Bucket encoding or decoding error.
    #[error("bucket codec error: {0}")]
    Codec(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] tidepool_db::DbError),
}
