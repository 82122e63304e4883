//! Error types for blob store operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob store operations.
///
/// Every variant is a remote-store failure from the caller's point of view:
/// none of them are retried here.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Blob not found at the specified location.
    #[error("blob not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// Invalid storage URI or container name.
    #[error("invalid storage uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The operation did not finish before the configured deadline.
    #[error("{op} {container}/{key} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        container: String,
        key: String,
        timeout: Duration,
    },

    /// A blob was larger than the caller allowed to buffer.
    #[error("blob {container}/{key} is larger than {limit} bytes")]
    TooLarge {
        container: String,
        key: String,
        limit: u64,
    },

    /// Error reported by the underlying object store.
    #[error("object store error: {0}")]
    Store(#[source] object_store::Error),

    /// I/O error while preparing a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub(crate) fn from_store(err: object_store::Error, container: &str, key: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            },
            other => BlobError::Store(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

impl From<url::ParseError> for BlobError {
    fn from(err: url::ParseError) -> Self {
        BlobError::InvalidUri {
            uri: String::new(),
            reason: err.to_string(),
        }
    }
}
