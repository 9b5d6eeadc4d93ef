//! Mock object storage for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::asset::content_type_for_key;
use crate::storage::{ObjectHead, ObjectStorage, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    content: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-memory implementation of the ObjectStorage trait.
///
/// Provides controllable behavior for testing:
/// - Put and remove objects per bucket
/// - Fail every call, or only the next few, with a transient I/O error
/// - Delay every call to exercise read timeouts
/// - Count `head` and `get` calls, and the content bytes handed out
#[derive(Debug, Clone, Default)]
pub struct MockObjectStorage {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
    always_fail: Arc<RwLock<bool>>,
    fail_remaining: Arc<RwLock<u32>>,
    delay: Arc<RwLock<Option<Duration>>>,
    head_calls: Arc<RwLock<usize>>,
    get_calls: Arc<RwLock<usize>>,
    bytes_served: Arc<RwLock<u64>>,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object.
    pub async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) {
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content,
                last_modified: Utc::now(),
            },
        );
    }

    /// Delete an object, as if it was removed after the notification.
    pub async fn remove(&self, bucket: &str, key: &str) {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// Make every call fail with a transient error.
    pub async fn set_always_fail(&self, fail: bool) {
        *self.always_fail.write().await = fail;
    }

    /// Make the next `count` calls fail with a transient error.
    pub async fn fail_next(&self, count: u32) {
        *self.fail_remaining.write().await = count;
    }

    /// Delay every call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn head_calls(&self) -> usize {
        *self.head_calls.read().await
    }

    pub async fn get_calls(&self) -> usize {
        *self.get_calls.read().await
    }

    /// Total content bytes returned by `get` and `get_range`.
    pub async fn bytes_served(&self) -> u64 {
        *self.bytes_served.read().await
    }

    async fn before_call(&self) -> Result<(), StorageError> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.always_fail.read().await {
            return Err(StorageError::Io(std::io::Error::other(
                "mock storage unavailable",
            )));
        }

        let mut remaining = self.fail_remaining.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StorageError::Io(std::io::Error::other(
                "mock storage connection reset",
            )));
        }
        Ok(())
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead, StorageError> {
        *self.head_calls.write().await += 1;
        self.before_call().await?;

        let object = self.lookup(bucket, key).await?;
        Ok(ObjectHead {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: object.content.len() as u64,
            content_type: content_type_for_key(key).to_string(),
            last_modified: Some(object.last_modified),
            etag: Some(format!("{:x}", md5::compute(&object.content))),
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        *self.get_calls.write().await += 1;
        self.before_call().await?;

        let content = self.lookup(bucket, key).await?.content;
        *self.bytes_served.write().await += content.len() as u64;
        Ok(content)
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        len: u64,
    ) -> Result<Vec<u8>, StorageError> {
        self.before_call().await?;

        let mut content = self.lookup(bucket, key).await?.content;
        content.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        *self.bytes_served.write().await += content.len() as u64;
        Ok(content)
    }
}
