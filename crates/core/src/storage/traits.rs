//! Trait definitions for object storage.

use async_trait::async_trait;

use super::error::StorageError;
use super::types::ObjectHead;

/// Read-only access to durable object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Object attributes, or `NotFound`.
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead, StorageError>;

    /// Full object content, or `NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// At most the first `len` bytes of the object, or `NotFound`.
    async fn get_range(&self, bucket: &str, key: &str, len: u64)
        -> Result<Vec<u8>, StorageError>;
}
