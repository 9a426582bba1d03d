//! Error types for catch-up operations.

use thiserror::Error;

/// Errors that can occur while catching up to a target state.
#[derive(Debug, Error)]
pub enum CatchupError {
    /// The target descriptor's level count does not match the bucket list.
    #[error("target descriptor has {actual} levels, bucket list has {expected}")]
    LevelCountMismatch { expected: usize, actual: usize },

    /// A hash in the target descriptor is not valid hex.
    #[error("invalid bucket hash in target descriptor: {0:?}")]
    InvalidHash(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bucket error.
    #[error(transparent)]
    Bucket(#[from] tidepool_bucket::BucketError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] tidepool_db::DbError),
}
