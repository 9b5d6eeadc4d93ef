//! Extraction worker: reads an object and derives its metadata.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::asset::asset_type_for_key;
use crate::metrics;
use crate::retry::Classify;
use crate::storage::{ObjectStorage, StorageConfig, StorageError};

use super::error::ExtractionError;
use super::registry::ExtractorRegistry;
use super::types::{AssetMetadata, ExtractionRequest};

/// Prefix handed to extractors for objects too large to read whole.
const SAMPLE_BYTES: u64 = 64 * 1024;

/// Stateless unit invoked by the workflow engine.
///
/// The only side effect of [`extract`](Self::extract) is the storage read.
#[derive(Clone)]
pub struct ExtractionWorker {
    storage: Arc<dyn ObjectStorage>,
    registry: ExtractorRegistry,
    read_timeout: Duration,
    max_hash_bytes: u64,
}

impl ExtractionWorker {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        registry: ExtractorRegistry,
        config: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            read_timeout: config.read_timeout(),
            max_hash_bytes: config.max_hash_bytes,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_hash_bytes(mut self, max_hash_bytes: u64) -> Self {
        self.max_hash_bytes = max_hash_bytes;
        self
    }

    async fn bounded<T>(
        &self,
        request: &ExtractionRequest,
        op: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.read_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                secs: self.read_timeout.as_secs(),
            }),
        }
    }

    /// Run one extraction attempt.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<AssetMetadata, ExtractionError> {
        let asset_type = asset_type_for_key(&request.key);
        let started = Instant::now();

        let result = self.extract_inner(request).await;

        let label = match &result {
            Ok(_) => "success",
            Err(e) if e.is_transient() => "transient",
            Err(_) => "fatal",
        };
        metrics::EXTRACTION_ATTEMPTS
            .with_label_values(&[asset_type.as_str(), label])
            .inc();
        metrics::EXTRACTION_DURATION
            .with_label_values(&[asset_type.as_str()])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn extract_inner(
        &self,
        request: &ExtractionRequest,
    ) -> Result<AssetMetadata, ExtractionError> {
        let asset_type = asset_type_for_key(&request.key);

        let head = self
            .bounded(request, self.storage.head(&request.bucket, &request.key))
            .await?;

        let extractor = self
            .registry
            .get(asset_type)
            .ok_or_else(|| ExtractionError::unsupported(asset_type, head.content_type.clone()))?;

        // Objects over the hash bound are never held in memory whole.
        let (content, etag, content_hash) = if head.size <= self.max_hash_bytes {
            let content = self
                .bounded(request, self.storage.get(&request.bucket, &request.key))
                .await?;
            let etag = format!("{:x}", md5::compute(&content));
            let content_hash = format!("{:x}", Sha256::digest(&content));
            (content, etag, content_hash)
        } else {
            let content = self
                .bounded(
                    request,
                    self.storage
                        .get_range(&request.bucket, &request.key, SAMPLE_BYTES),
                )
                .await?;
            let etag = head.etag.clone().unwrap_or_else(|| {
                let modified = head
                    .last_modified
                    .map(|t| t.timestamp_millis())
                    .unwrap_or_default();
                format!("{:x}-{:x}", head.size, modified)
            });
            (content, etag.clone(), etag)
        };

        let attributes = extractor.extract(&head, &content).await?;

        debug!(
            execution_id = %request.execution_id,
            asset_id = %request.asset_id,
            extractor = extractor.name(),
            size = head.size,
            bytes_read = content.len(),
            "Extraction succeeded"
        );

        Ok(AssetMetadata {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            content_type: head.content_type,
            content_length: head.size,
            etag,
            content_hash,
            last_modified: head.last_modified,
            asset_type,
            attributes,
        })
    }
}
