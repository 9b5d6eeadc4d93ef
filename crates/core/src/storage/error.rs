//! Error types for object storage.

use thiserror::Error;

use crate::retry::{Classify, ErrorClass};

/// Errors returned by an [`ObjectStorage`](super::ObjectStorage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist (deleted or moved after the notification).
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The bucket or key cannot address an object.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// The read did not finish within the timeout.
    #[error("Read of {bucket}/{key} timed out after {secs}s")]
    Timeout {
        bucket: String,
        key: String,
        secs: u64,
    },

    /// I/O error talking to the backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } | Self::InvalidKey(_) => ErrorClass::NonRetryable,
            Self::Timeout { .. } | Self::Io(_) => ErrorClass::Transient,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ObjectNotFound",
            Self::InvalidKey(_) => "InvalidObjectKey",
            Self::Timeout { .. } | Self::Io(_) => "TransientStorageError",
        }
    }
}
