//! Error types for extraction.

use thiserror::Error;

use crate::asset::AssetType;
use crate::retry::{Classify, ErrorClass};
use crate::storage::StorageError;

/// Failure of one extraction attempt.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Object deleted or moved between trigger and processing.
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Storage read failed in a way that may succeed later.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// No extractor handles this kind of object.
    #[error("Unsupported format: {content_type} ({asset_type:?})")]
    UnsupportedFormat {
        asset_type: AssetType,
        content_type: String,
    },

    /// The object claims a format but its bytes do not parse.
    #[error("Malformed object: {0}")]
    Malformed(String),

    /// The key cannot address an object.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl ExtractionError {
    pub fn unsupported(asset_type: AssetType, content_type: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            asset_type,
            content_type: content_type.into(),
        }
    }
}

impl Classify for ExtractionError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::TransientStorage(_) => ErrorClass::Transient,
            _ => ErrorClass::NonRetryable,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ObjectNotFound { .. } => "ObjectNotFound",
            Self::TransientStorage(_) => "TransientStorageError",
            Self::UnsupportedFormat { .. } => "UnsupportedFormat",
            Self::Malformed(_) => "MalformedObject",
            Self::InvalidKey(_) => "InvalidObjectKey",
        }
    }
}

impl From<StorageError> for ExtractionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { bucket, key } => Self::ObjectNotFound { bucket, key },
            StorageError::InvalidKey(msg) => Self::InvalidKey(msg),
            other => Self::TransientStorage(other.to_string()),
        }
    }
}
