//! Error classification and exponential backoff shared by the engine and the trigger.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a step failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network or storage hiccup; retried with backoff, bounded.
    Transient,
    /// Malformed input, unsupported format, missing object; fails immediately.
    NonRetryable,
}

/// Implemented by errors that a retrying caller needs to classify.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Stable code recorded as `errorDetail`.
    fn code(&self) -> &'static str;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}
