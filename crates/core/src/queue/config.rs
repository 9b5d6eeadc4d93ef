//! Work queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the feature work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name of the live queue. The paired dead-letter queue shares the name.
    #[serde(default = "default_name")]
    pub name: String,

    /// How long a received message stays hidden from other consumers (seconds).
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deliveries allowed before a message is dead-lettered.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Upper bound for a single long-poll receive (seconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// How often a long-poll receive re-checks the queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_name() -> String {
    "asset-features".to_string()
}

fn default_visibility_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_max_wait() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    200
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            visibility_timeout_secs: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            max_wait_secs: default_max_wait(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}
