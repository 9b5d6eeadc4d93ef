//! Work queue trait and errors.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{Classify, ErrorClass};

use super::{DeadLetter, QueueStats, ReceivedMessage};

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The receipt handle is unknown, already acknowledged, or superseded by a later delivery.
    #[error("receipt handle not found: {0}")]
    ReceiptNotFound(String),

    /// No dead-lettered message with this id.
    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(String),

    /// Database error.
    #[error("queue database error: {0}")]
    Database(String),
}

impl Classify for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Database(_) => ErrorClass::Transient,
            Self::ReceiptNotFound(_) | Self::DeadLetterNotFound(_) => ErrorClass::NonRetryable,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ReceiptNotFound(_) => "ReceiptNotFound",
            Self::DeadLetterNotFound(_) => "DeadLetterNotFound",
            Self::Database(_) => "QueueUnavailable",
        }
    }
}

/// Durable at-least-once queue with a visibility window and a paired dead-letter queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name of the live queue.
    fn name(&self) -> &str;

    /// Durably accept a message and return its id.
    async fn enqueue(&self, body: &str) -> Result<String, QueueError>;

    /// Receive one message, waiting up to `max_wait` for one to become visible.
    ///
    /// Returns `None` when nothing was available within the wait. A message
    /// that would exceed the delivery limit is moved to the dead-letter queue
    /// instead of being returned.
    async fn dequeue(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Permanently remove the message delivered with `receipt_handle`.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Current queue depth.
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Most recently dead-lettered messages first.
    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError>;

    /// Move a dead-lettered message back to the live queue with a fresh delivery count.
    async fn redrive(&self, message_id: &str) -> Result<(), QueueError>;
}
