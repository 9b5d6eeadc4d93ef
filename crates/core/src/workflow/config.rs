//! Workflow engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;

/// Configuration for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Attempts per step before the execution fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds). Doubles per retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on a retry delay (milliseconds).
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,

    /// Executions driven at the same time. Others wait for a slot.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,

    /// Recover non-terminal executions on start and keep sweeping for them.
    #[serde(default = "default_resume_on_start")]
    pub resume_on_start: bool,

    /// How often the resume sweep looks for stranded executions (milliseconds).
    #[serde(default = "default_resume_interval")]
    pub resume_poll_interval_ms: u64,

    /// How long an engine owns an execution without persisting progress
    /// before another engine may take it over (seconds).
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2000 // 2 seconds
}

fn default_backoff_cap() -> u64 {
    30_000 // 30 seconds
}

fn default_max_concurrent() -> usize {
    8
}

fn default_resume_on_start() -> bool {
    true
}

fn default_resume_interval() -> u64 {
    5000
}

fn default_lease() -> u64 {
    120
}

impl WorkflowConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.backoff_base_ms, self.backoff_cap_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            max_concurrent_executions: default_max_concurrent(),
            resume_on_start: default_resume_on_start(),
            resume_poll_interval_ms: default_resume_interval(),
            lease_secs: default_lease(),
        }
    }
}
