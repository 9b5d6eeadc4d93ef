//! Ingest trigger: object-created notifications in, workflow executions out.

mod config;
mod filter;
mod ingest;
mod types;

pub use config::TriggerConfig;
pub use filter::{decode_key, KeyFilter};
pub use ingest::{IngestTrigger, TriggerError, WorkflowStarter};
pub use types::{
    IngestSummary, NotificationEnvelope, NotificationRecord, ObjectCreatedEvent, RecordOutcome,
    RecordResult, S3Bucket, S3Entity, S3Object,
};
