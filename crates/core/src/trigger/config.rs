//! Ingest trigger configuration.

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;

/// Configuration for the ingest trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Attempts at starting an execution before the event is dropped.
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,

    /// Base delay between start attempts (milliseconds).
    #[serde(default = "default_start_backoff")]
    pub start_backoff_ms: u64,

    /// Upper bound of the delay between start attempts (milliseconds).
    #[serde(default = "default_start_backoff_cap")]
    pub start_backoff_cap_ms: u64,

    /// Keys under these prefixes never start an execution.
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

fn default_start_attempts() -> u32 {
    5
}

fn default_start_backoff() -> u64 {
    200
}

fn default_start_backoff_cap() -> u64 {
    5_000
}

fn default_skip_prefixes() -> Vec<String> {
    vec!["processed/".to_string(), "results/".to_string()]
}

impl TriggerConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.start_backoff_ms, self.start_backoff_cap_ms)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            start_attempts: default_start_attempts(),
            start_backoff_ms: default_start_backoff(),
            start_backoff_cap_ms: default_start_backoff_cap(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}
