//! Status storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::asset::FeatureType;
use crate::retry::{Classify, ErrorClass};
use crate::status::{AssetRecord, AssetStatus, StatusUpdate, UpsertResult};

/// Error type for status store operations.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Input rejected before touching the store.
    #[error("invalid status update: {0}")]
    InvalidInput(String),

    /// Database error.
    #[error("status store database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("corrupt status record: {0}")]
    Corrupt(String),
}

impl Classify for StatusError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Database(_) => ErrorClass::Transient,
            Self::InvalidInput(_) | Self::Corrupt(_) => ErrorClass::NonRetryable,
        }
    }

    fn code(&self) -> &'static str {
        "StatusWriteFailed"
    }
}

/// Identity of one trigger event for deduplication.
///
/// Two objects that share a file stem map to the same asset id, so the
/// object itself is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerKey<'a> {
    pub asset_id: &'a str,
    pub feature_type: FeatureType,
    pub bucket: &'a str,
    pub object_key: &'a str,
    pub event_time: DateTime<Utc>,
}

/// Result of claiming a trigger event for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerClaim {
    /// This caller owns the event and must start the execution.
    Claimed,
    /// The event was already claimed by another execution.
    AlreadyClaimed { execution_id: String },
}

/// Filter for listing status records.
#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    pub status: Option<AssetStatus>,
    pub feature_type: Option<FeatureType>,
    pub limit: i64,
    pub offset: i64,
}

impl StatusFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            feature_type: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: AssetStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_feature_type(mut self, feature_type: FeatureType) -> Self {
        self.feature_type = Some(feature_type);
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

/// Key-value table of asset processing status, keyed by `(asset_id, feature_type)`.
pub trait StatusStore: Send + Sync {
    /// Fetch one record.
    fn get(
        &self,
        asset_id: &str,
        feature_type: FeatureType,
    ) -> Result<Option<AssetRecord>, StatusError>;

    /// Atomically merge a status write into the stored record.
    fn upsert(&self, update: &StatusUpdate) -> Result<UpsertResult, StatusError>;

    /// All records of one asset, ordered by feature type.
    fn list_for_asset(&self, asset_id: &str) -> Result<Vec<AssetRecord>, StatusError>;

    /// Records matching the filter, most recently updated first.
    fn list(&self, filter: &StatusFilter) -> Result<Vec<AssetRecord>, StatusError>;

    /// Count records matching the filter.
    fn count(&self, filter: &StatusFilter) -> Result<i64, StatusError>;

    /// Stream of every record change that was written.
    fn subscribe_changes(&self) -> broadcast::Receiver<AssetRecord>;

    /// Claim a trigger event for one execution.
    fn claim_trigger(
        &self,
        key: &TriggerKey<'_>,
        execution_id: &str,
    ) -> Result<TriggerClaim, StatusError>;

    /// Undo a claim so that a redelivered event can be processed again.
    fn release_trigger(&self, key: &TriggerKey<'_>, execution_id: &str)
        -> Result<(), StatusError>;
}
