//! File system object storage implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::asset::content_type_for_key;

use super::error::StorageError;
use super::traits::ObjectStorage;
use super::types::ObjectHead;

/// Object storage backed by a local directory: `<root>/<bucket>/<key>`.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object path, rejecting anything that could escape the bucket.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.') {
            return Err(StorageError::InvalidKey(format!("bad bucket name: {:?}", bucket)));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!("bad key: {:?}", key)));
        }

        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            match segment {
                "" => continue,
                "." | ".." => {
                    return Err(StorageError::InvalidKey(format!(
                        "key contains relative segment: {:?}",
                        key
                    )))
                }
                s if s.contains('\\') || s.contains('\0') => {
                    return Err(StorageError::InvalidKey(format!(
                        "key contains invalid characters: {:?}",
                        key
                    )))
                }
                s => path.push(s),
            }
        }
        Ok(path)
    }

    fn map_io(e: std::io::Error, bucket: &str, key: &str) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    fn name(&self) -> &str {
        "fs"
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead, StorageError> {
        let path = self.object_path(bucket, key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, key))?;

        if !meta.is_file() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
        let etag = last_modified.map(|t| {
            format!("{:x}-{:x}", meta.len(), t.timestamp_nanos_opt().unwrap_or_default())
        });

        Ok(ObjectHead {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: meta.len(),
            content_type: content_type_for_key(key).to_string(),
            last_modified,
            etag,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            // Reading a directory is a missing object, not an I/O fault.
            Err(e) if path.is_dir() => Err(Self::map_io(
                std::io::Error::new(std::io::ErrorKind::NotFound, e),
                bucket,
                key,
            )),
            Err(e) => Err(Self::map_io(e, bucket, key)),
        }
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        len: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        if path.is_dir() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, key))?;
        let mut bytes = Vec::new();
        file.take(len)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| Self::map_io(e, bucket, key))?;
        Ok(bytes)
    }
}
