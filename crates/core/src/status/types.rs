//! Asset status records and the monotonic merge rule.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::FeatureType;

/// Processing status of one `(asset_id, feature_type)` pair.
///
/// Variants are declared in progression order; `rank` follows it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Pending,
    Extracting,
    Extracted,
    Queued,
    Failed,
}

impl AssetStatus {
    pub const ALL: [AssetStatus; 5] = [
        AssetStatus::Pending,
        AssetStatus::Extracting,
        AssetStatus::Extracted,
        AssetStatus::Queued,
        AssetStatus::Failed,
    ];

    /// Position in the progression `PENDING < EXTRACTING < EXTRACTED < QUEUED < FAILED`.
    pub fn rank(&self) -> u8 {
        match self {
            AssetStatus::Pending => 0,
            AssetStatus::Extracting => 1,
            AssetStatus::Extracted => 2,
            AssetStatus::Queued => 3,
            AssetStatus::Failed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "PENDING",
            AssetStatus::Extracting => "EXTRACTING",
            AssetStatus::Extracted => "EXTRACTED",
            AssetStatus::Queued => "QUEUED",
            AssetStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(AssetStatus::Pending),
            "EXTRACTING" => Ok(AssetStatus::Extracting),
            "EXTRACTED" => Ok(AssetStatus::Extracted),
            "QUEUED" => Ok(AssetStatus::Queued),
            "FAILED" => Ok(AssetStatus::Failed),
            other => Err(format!("unknown asset status: {}", other)),
        }
    }
}

/// Durable status record. At most one exists per `(asset_id, feature_type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub asset_id: String,
    pub feature_type: FeatureType,
    pub status: AssetStatus,
    /// Number of execution lineages that have written this key.
    pub attempt: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Execution lineage that produced the current value.
    pub execution_id: String,
}

/// A status write produced by one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub asset_id: String,
    pub feature_type: FeatureType,
    pub status: AssetStatus,
    pub error_detail: Option<String>,
    pub execution_id: String,
    /// When the writer observed this status; used to discard out-of-order writes.
    pub observed_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(
        asset_id: impl Into<String>,
        feature_type: FeatureType,
        status: AssetStatus,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            feature_type,
            status,
            error_detail: None,
            execution_id: execution_id.into(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Identical to the stored value; nothing written.
    Unchanged,
    /// Out of order or regressing; discarded.
    Stale,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::Stale => "stale",
        }
    }

    /// Whether the stored record changed.
    pub fn is_write(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated)
    }
}

/// Result of an upsert: the outcome and the record as stored afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub record: AssetRecord,
}

/// Decision taken by [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    Insert(AssetRecord),
    Replace(AssetRecord),
    Unchanged,
    Stale(&'static str),
}

/// Decide how a status write combines with the stored record.
///
/// Within one lineage, writes older than the stored one and status
/// regressions are discarded. A different lineage takes over only with a
/// strictly newer write, and bumps `attempt`.
pub fn merge(existing: Option<&AssetRecord>, update: &StatusUpdate) -> MergeDecision {
    let Some(current) = existing else {
        return MergeDecision::Insert(AssetRecord {
            asset_id: update.asset_id.clone(),
            feature_type: update.feature_type,
            status: update.status,
            attempt: 1,
            last_updated: update.observed_at,
            error_detail: update.error_detail.clone(),
            execution_id: update.execution_id.clone(),
        });
    };

    if current.execution_id == update.execution_id {
        if update.observed_at < current.last_updated {
            return MergeDecision::Stale("older than stored write");
        }
        if update.status.rank() < current.status.rank() {
            return MergeDecision::Stale("status regression");
        }
        if update.status == current.status && update.error_detail == current.error_detail {
            return MergeDecision::Unchanged;
        }

        return MergeDecision::Replace(AssetRecord {
            status: update.status,
            error_detail: update.error_detail.clone(),
            last_updated: update.observed_at,
            ..current.clone()
        });
    }

    if update.observed_at <= current.last_updated {
        return MergeDecision::Stale("superseded lineage");
    }

    MergeDecision::Replace(AssetRecord {
        asset_id: current.asset_id.clone(),
        feature_type: current.feature_type,
        status: update.status,
        attempt: current.attempt + 1,
        last_updated: update.observed_at,
        error_detail: update.error_detail.clone(),
        execution_id: update.execution_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn update(status: AssetStatus, execution_id: &str, at: DateTime<Utc>) -> StatusUpdate {
        StatusUpdate::new("42", FeatureType::ImageMeta, status, execution_id).observed_at(at)
    }

    fn stored(update: &StatusUpdate) -> AssetRecord {
        match merge(None, update) {
            MergeDecision::Insert(record) => record,
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_status_rank_order() {
        assert!(AssetStatus::Pending.rank() < AssetStatus::Extracting.rank());
        assert!(AssetStatus::Extracting.rank() < AssetStatus::Extracted.rank());
        assert!(AssetStatus::Extracted.rank() < AssetStatus::Queued.rank());
        assert!(AssetStatus::Queued.rank() < AssetStatus::Failed.rank());
    }

    #[test]
    fn test_status_parse_and_serialize() {
        assert_eq!("extracted".parse::<AssetStatus>().unwrap(), AssetStatus::Extracted);
        assert!("DONE".parse::<AssetStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&AssetStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
    }

    #[test]
    fn test_first_write_inserts_with_attempt_one() {
        let now = Utc::now();
        let record = stored(&update(AssetStatus::Pending, "exec-1", now));
        assert_eq!(record.attempt, 1);
        assert_eq!(record.status, AssetStatus::Pending);
        assert_eq!(record.last_updated, now);
    }

    #[test]
    fn test_same_lineage_progression_replaces() {
        let now = Utc::now();
        let record = stored(&update(AssetStatus::Pending, "exec-1", now));

        let next = update(AssetStatus::Extracted, "exec-1", now + Duration::seconds(1));
        match merge(Some(&record), &next) {
            MergeDecision::Replace(updated) => {
                assert_eq!(updated.status, AssetStatus::Extracted);
                assert_eq!(updated.attempt, 1);
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_write_is_unchanged() {
        let now = Utc::now();
        let write = update(AssetStatus::Extracted, "exec-1", now);
        let record = stored(&write);
        assert_eq!(merge(Some(&record), &write), MergeDecision::Unchanged);
    }

    #[test]
    fn test_same_lineage_regression_is_stale() {
        let now = Utc::now();
        let record = stored(&update(AssetStatus::Extracted, "exec-1", now));

        let late = update(AssetStatus::Pending, "exec-1", now + Duration::seconds(5));
        assert_eq!(
            merge(Some(&record), &late),
            MergeDecision::Stale("status regression")
        );
    }

    #[test]
    fn test_out_of_order_write_is_stale() {
        let now = Utc::now();
        let record = stored(&update(AssetStatus::Extracting, "exec-1", now));

        let older = update(AssetStatus::Extracted, "exec-1", now - Duration::seconds(1));
        assert_eq!(
            merge(Some(&record), &older),
            MergeDecision::Stale("older than stored write")
        );
    }

    #[test]
    fn test_nothing_follows_failed_in_same_lineage() {
        let now = Utc::now();
        let record =
            stored(&update(AssetStatus::Failed, "exec-1", now).with_error("ObjectNotFound"));

        let after = update(AssetStatus::Queued, "exec-1", now + Duration::seconds(1));
        assert!(matches!(merge(Some(&record), &after), MergeDecision::Stale(_)));
    }

    #[test]
    fn test_new_lineage_restarts_and_bumps_attempt() {
        let now = Utc::now();
        let record =
            stored(&update(AssetStatus::Failed, "exec-1", now).with_error("ObjectNotFound"));

        let restart = update(AssetStatus::Pending, "exec-2", now + Duration::seconds(1));
        match merge(Some(&record), &restart) {
            MergeDecision::Replace(updated) => {
                assert_eq!(updated.status, AssetStatus::Pending);
                assert_eq!(updated.attempt, 2);
                assert_eq!(updated.execution_id, "exec-2");
                assert!(updated.error_detail.is_none());
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn test_superseded_lineage_write_is_stale() {
        let now = Utc::now();
        let record = stored(&update(AssetStatus::Pending, "exec-2", now));

        let old_lineage = update(AssetStatus::Queued, "exec-1", now - Duration::seconds(1));
        assert_eq!(
            merge(Some(&record), &old_lineage),
            MergeDecision::Stale("superseded lineage")
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = stored(&update(AssetStatus::Extracted, "exec-1", Utc::now()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["assetId"], "42");
        assert_eq!(json["featureType"], "image-meta");
        assert_eq!(json["status"], "EXTRACTED");
        assert!(json.get("errorDetail").is_none());
    }
}
