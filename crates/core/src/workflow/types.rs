//! Workflow execution types and the state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::{asset_id_from_key, asset_type_for_key, FeatureType};
use crate::extractor::AssetMetadata;
use crate::retry::{Classify, ErrorClass};
use crate::status::AssetStatus;

use super::store::ExecutionStoreError;

/// State of one workflow execution.
///
/// `STARTED -> EXTRACTING -> EXTRACTED -> UPDATING_STATUS -> COMPLETED`,
/// and any non-terminal state may move to `FAILED`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Started,
    Extracting,
    Extracted,
    UpdatingStatus,
    Completed,
    Failed,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 6] = [
        ExecutionState::Started,
        ExecutionState::Extracting,
        ExecutionState::Extracted,
        ExecutionState::UpdatingStatus,
        ExecutionState::Completed,
        ExecutionState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Started => "STARTED",
            ExecutionState::Extracting => "EXTRACTING",
            ExecutionState::Extracted => "EXTRACTED",
            ExecutionState::UpdatingStatus => "UPDATING_STATUS",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Started, Extracting)
                | (Extracting, Extracting)
                | (Extracting, Extracted)
                | (Extracted, UpdatingStatus)
                | (UpdatingStatus, Completed)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        ExecutionState::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| format!("unknown execution state: {}", s))
    }
}

/// What started an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSource {
    /// Object-created notification.
    Notification,
    /// Manual re-trigger; always a fresh lineage.
    Retrigger,
}

impl ExecutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionSource::Notification => "notification",
            ExecutionSource::Retrigger => "retrigger",
        }
    }
}

impl FromStr for ExecutionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notification" => Ok(ExecutionSource::Notification),
            "retrigger" => Ok(ExecutionSource::Retrigger),
            other => Err(format!("unknown execution source: {}", other)),
        }
    }
}

/// Request to start one execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub asset_id: String,
    pub feature_type: FeatureType,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub event_time: DateTime<Utc>,
    pub source: ExecutionSource,
}

impl ExecutionRequest {
    /// Build a request with a fresh execution id.
    ///
    /// The asset id and feature type are derived from the key.
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        event_time: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        let key = key.into();
        let asset_id = asset_id_from_key(&key)
            .ok_or_else(|| WorkflowError::InvalidObjectKey(key.clone()))?;
        let feature_type = FeatureType::for_asset_type(asset_type_for_key(&key));

        Ok(Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            asset_id,
            feature_type,
            bucket: bucket.into(),
            key,
            size: None,
            event_time,
            source: ExecutionSource::Notification,
        })
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_source(mut self, source: ExecutionSource) -> Self {
        self.source = source;
        self
    }
}

/// One run of the workflow for one trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub asset_id: String,
    pub feature_type: FeatureType,
    pub bucket: String,
    pub object_key: String,
    pub event_time: DateTime<Utc>,
    pub source: ExecutionSource,
    pub state: ExecutionState,
    /// Extraction attempts finished so far.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AssetMetadata>,
    /// Id of the downstream message once enqueued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// New execution in `STARTED`.
    pub fn from_request(request: &ExecutionRequest) -> Self {
        let now = Utc::now();
        Self {
            execution_id: request.execution_id.clone(),
            asset_id: request.asset_id.clone(),
            feature_type: request.feature_type,
            bucket: request.bucket.clone(),
            object_key: request.key.clone(),
            event_time: request.event_time,
            source: request.source,
            state: ExecutionState::Started,
            attempt: 0,
            result: None,
            message_id: None,
            error_detail: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Milliseconds between start and completion (or now, while running).
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Body of the queue message published for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureReadyMessage {
    pub execution_id: String,
    pub asset_id: String,
    pub feature_type: FeatureType,
    pub status: AssetStatus,
    pub metadata: AssetMetadata,
    pub extracted_at: DateTime<Utc>,
}

/// Filter for listing executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub state: Option<ExecutionState>,
    pub asset_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl ExecutionFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            asset_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Current status of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Whether the engine accepts new executions.
    pub running: bool,
    /// Executions currently being driven.
    pub active: usize,
    /// Stored executions per state.
    pub counts: BTreeMap<String, i64>,
}

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No asset id can be derived from the key.
    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    /// The engine is stopped.
    #[error("workflow engine is not running")]
    NotRunning,

    /// Execution not found.
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// A step tried a move the state machine forbids.
    #[error("invalid execution transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// Execution store error.
    #[error("execution store error: {0}")]
    Store(#[from] ExecutionStoreError),
}

impl Classify for WorkflowError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotRunning | Self::Store(_) => ErrorClass::Transient,
            _ => ErrorClass::NonRetryable,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidObjectKey(_) => "InvalidObjectKey",
            Self::NotRunning => "EngineNotRunning",
            Self::ExecutionNotFound(_) => "ExecutionNotFound",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Store(_) => "ExecutionStoreError",
        }
    }
}
