//! Error types for the store layer.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Profile not found.
    #[error("profile not found: {0}")]
    NotFound(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The backing store refused or could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<profilesync_types::Error> for StoreError {
    fn from(err: profilesync_types::Error) -> Self {
        match err {
            profilesync_types::Error::Serialization(e) => Self::Serialization(e),
            profilesync_types::Error::InvalidUuid(e) => Self::InvalidData(e.to_string()),
        }
    }
}
