//! Object storage configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the local object storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each bucket is a sub-directory.
    pub root: PathBuf,

    /// Upper bound for a single object read (seconds).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Objects up to this size get a SHA-256 content hash; larger ones reuse the etag.
    #[serde(default = "default_max_hash_bytes")]
    pub max_hash_bytes: u64,
}

fn default_read_timeout() -> u64 {
    30
}

fn default_max_hash_bytes() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_timeout_secs: default_read_timeout(),
            max_hash_bytes: default_max_hash_bytes(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
