//! Work queue message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message handed to a consumer by `dequeue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
    /// Handle to `ack` this delivery. Superseded by the next delivery.
    pub receipt_handle: String,
    pub sent_at: DateTime<Utc>,
    /// When the message becomes visible again if not acknowledged.
    pub visible_after: DateTime<Utc>,
}

/// A message quarantined after exceeding the delivery limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: String,
    pub queue: String,
    pub body: String,
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Messages that can be received now.
    pub visible: i64,
    /// Messages received but not yet acknowledged or expired.
    pub in_flight: i64,
    /// Messages in the dead-letter queue.
    pub dead_lettered: i64,
}
