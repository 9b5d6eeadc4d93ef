use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Execution lifecycle
    ExecutionStarted {
        execution_id: String,
        asset_id: String,
        feature_type: String,
        bucket: String,
        key: String,
        event_time: DateTime<Utc>,
        /// "notification" or "retrigger"
        source: String,
    },
    ExecutionStateChanged {
        execution_id: String,
        asset_id: String,
        from_state: String,
        to_state: String,
        reason: Option<String>,
    },
    /// Terminal record of an execution.
    ExecutionFinished {
        execution_id: String,
        asset_id: String,
        feature_type: String,
        /// "completed" or "failed"
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_detail: Option<String>,
        /// Extraction attempts performed
        attempts: u32,
        elapsed_ms: u64,
    },

    // Trigger events
    TriggerDuplicate {
        asset_id: String,
        key: String,
        event_time: DateTime<Utc>,
        /// Execution that already owns the event
        execution_id: String,
    },
    /// The engine could not be started; the event is lost.
    TriggerDropped {
        asset_id: String,
        key: String,
        event_time: DateTime<Utc>,
        attempts: u32,
        error: String,
    },

    // Queue events
    MessageDeadLettered {
        queue: String,
        message_id: String,
        receive_count: u32,
    },
    MessageRedriven {
        queue: String,
        message_id: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionStateChanged { .. } => "execution_state_changed",
            Self::ExecutionFinished { .. } => "execution_finished",
            Self::TriggerDuplicate { .. } => "trigger_duplicate",
            Self::TriggerDropped { .. } => "trigger_dropped",
            Self::MessageDeadLettered { .. } => "message_dead_lettered",
            Self::MessageRedriven { .. } => "message_redriven",
        }
    }

    /// Extract execution_id if this event is execution-related
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionStateChanged { execution_id, .. }
            | Self::ExecutionFinished { execution_id, .. }
            | Self::TriggerDuplicate { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }

    /// Extract asset_id if this event concerns one asset
    pub fn asset_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStarted { asset_id, .. }
            | Self::ExecutionStateChanged { asset_id, .. }
            | Self::ExecutionFinished { asset_id, .. }
            | Self::TriggerDuplicate { asset_id, .. }
            | Self::TriggerDropped { asset_id, .. } => Some(asset_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub execution_id: Option<String>,
    pub asset_id: Option<String>,
    pub data: AuditEvent,
}
