//! Object-storage notification envelope and per-record outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification envelope: `{"Records": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

/// One record of a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key.
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

impl NotificationRecord {
    /// Whether this record announces a newly created object.
    pub fn is_object_created(&self) -> bool {
        self.event_source == "aws:s3" && self.event_name.starts_with("ObjectCreated")
    }
}

/// Trigger input: one created object with a decoded key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCreatedEvent {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub size: u64,
    pub event_time: DateTime<Utc>,
}

/// What the trigger did with one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Started {
        #[serde(rename = "executionId")]
        execution_id: String,
    },
    /// The event was already claimed by an execution.
    Duplicate {
        #[serde(rename = "executionId")]
        execution_id: String,
    },
    Skipped { reason: String },
    /// The engine could not be started; the event is lost.
    Dropped { error: String },
}

impl RecordOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Started { .. } => "started",
            RecordOutcome::Duplicate { .. } => "duplicate",
            RecordOutcome::Skipped { .. } => "skipped",
            RecordOutcome::Dropped { .. } => "dropped",
        }
    }
}

/// Outcome of one record, with the identifiers it resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

/// Summary returned for one notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    /// Records that started an execution.
    pub processed: usize,
    pub total: usize,
    pub message: String,
    pub records: Vec<RecordResult>,
}

impl IngestSummary {
    pub fn from_records(records: Vec<RecordResult>) -> Self {
        let processed = records
            .iter()
            .filter(|r| matches!(r.outcome, RecordOutcome::Started { .. }))
            .count();
        let total = records.len();
        Self {
            processed,
            total,
            message: format!("Processed {} of {} events", processed, total),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let json = r#"{
            "Records": [{
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "eventTime": "2024-05-01T12:00:00.000Z",
                "s3": {
                    "bucket": {"name": "uploads"},
                    "object": {"key": "img/42.png", "size": 1024}
                }
            }]
        }"#;

        let envelope: NotificationEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.records.len(), 1);
        let record = &envelope.records[0];
        assert!(record.is_object_created());
        assert_eq!(record.s3.bucket.name, "uploads");
        assert_eq!(record.s3.object.size, 1024);
    }

    #[test]
    fn test_removed_event_is_not_created() {
        let json = r#"{
            "eventSource": "aws:s3",
            "eventName": "ObjectRemoved:Delete",
            "eventTime": "2024-05-01T12:00:00Z",
            "s3": {"bucket": {"name": "b"}, "object": {"key": "k.png"}}
        }"#;
        let record: NotificationRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_object_created());
    }

    #[test]
    fn test_summary_counts_started() {
        let started = RecordResult {
            bucket: "b".to_string(),
            key: "a.png".to_string(),
            asset_id: Some("a".to_string()),
            outcome: RecordOutcome::Started {
                execution_id: "e1".to_string(),
            },
        };
        let skipped = RecordResult {
            bucket: "b".to_string(),
            key: ".hidden".to_string(),
            asset_id: None,
            outcome: RecordOutcome::Skipped {
                reason: "hidden".to_string(),
            },
        };

        let summary = IngestSummary::from_records(vec![started, skipped]);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.message, "Processed 1 of 2 events");

        let json = serde_json::to_value(&summary.records[0]).unwrap();
        assert_eq!(json["outcome"], "started");
        assert_eq!(json["executionId"], "e1");
    }
}
