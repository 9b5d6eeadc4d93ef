//! Ingest trigger: turns object-created notifications into executions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::retry::{Backoff, Classify};
use crate::status::{StatusError, StatusStore, TriggerClaim, TriggerKey};
use crate::workflow::{ExecutionRequest, ExecutionSource, WorkflowError};

use super::config::TriggerConfig;
use super::filter::{decode_key, KeyFilter};
use super::types::{
    IngestSummary, NotificationEnvelope, ObjectCreatedEvent, RecordOutcome, RecordResult,
};

/// Starts workflow executions. Implemented by the workflow engine.
#[async_trait]
pub trait WorkflowStarter: Send + Sync {
    /// Start one execution and return its id.
    async fn start(&self, request: ExecutionRequest) -> Result<String, WorkflowError>;
}

#[derive(Debug, Error)]
pub enum TriggerError {
    /// The notification body could not be parsed.
    #[error("invalid notification: {0}")]
    InvalidNotification(String),

    /// No execution can be built for this key.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// The dedupe table could not be read or written.
    #[error("status store error: {0}")]
    Status(#[from] StatusError),

    /// The engine did not accept the execution.
    #[error("failed to start execution after {attempts} attempts: {error}")]
    StartFailed { attempts: u32, error: String },
}

/// Receives object-created events and starts exactly one execution per event.
pub struct IngestTrigger {
    config: TriggerConfig,
    filter: KeyFilter,
    backoff: Backoff,
    starter: Arc<dyn WorkflowStarter>,
    status: Arc<dyn StatusStore>,
    audit: Option<AuditHandle>,
}

impl IngestTrigger {
    pub fn new(
        config: TriggerConfig,
        starter: Arc<dyn WorkflowStarter>,
        status: Arc<dyn StatusStore>,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            filter: KeyFilter::new(config.skip_prefixes.clone()),
            backoff: config.backoff(),
            config,
            starter,
            status,
            audit,
        }
    }

    /// Handle a raw JSON notification body.
    pub async fn handle_payload(&self, body: &[u8]) -> Result<IngestSummary, TriggerError> {
        let envelope: NotificationEnvelope = serde_json::from_slice(body)
            .map_err(|e| TriggerError::InvalidNotification(e.to_string()))?;
        self.handle_notification(envelope).await
    }

    /// Handle every record of a notification.
    ///
    /// Status store failures abort the notification so that the channel
    /// redelivers it; records already started dedupe on redelivery.
    pub async fn handle_notification(
        &self,
        envelope: NotificationEnvelope,
    ) -> Result<IngestSummary, TriggerError> {
        let mut results = Vec::with_capacity(envelope.records.len());

        for record in envelope.records {
            let bucket = record.s3.bucket.name.clone();
            let raw_key = record.s3.object.key.clone();

            if !record.is_object_created() {
                results.push(skipped(
                    bucket,
                    raw_key,
                    format!("not an object-created event: {}", record.event_name),
                ));
                continue;
            }

            let key = match decode_key(&raw_key) {
                Ok(key) => key,
                Err(reason) => {
                    results.push(skipped(bucket, raw_key, reason));
                    continue;
                }
            };

            let event = ObjectCreatedEvent {
                bucket,
                key,
                size: record.s3.object.size,
                event_time: record.event_time,
            };
            results.push(self.handle_event(event).await?);
        }

        let summary = IngestSummary::from_records(results);
        info!("{}", summary.message);
        Ok(summary)
    }

    /// Handle one object-created event with a decoded key.
    pub async fn handle_event(&self, event: ObjectCreatedEvent) -> Result<RecordResult, TriggerError> {
        if let Some(reason) = self.filter.skip_reason(&event.key) {
            debug!(key = %event.key, reason = %reason, "Skipping object");
            return Ok(skipped(event.bucket, event.key, reason));
        }

        let request = match ExecutionRequest::new(&event.bucket, &event.key, event.event_time) {
            Ok(request) => request.with_size(event.size),
            Err(e) => return Ok(skipped(event.bucket, event.key, e.to_string())),
        };

        self.claim_and_start(request).await
    }

    /// Start a fresh lineage for an object, independent of earlier events.
    pub async fn retrigger(&self, bucket: &str, key: &str) -> Result<RecordResult, TriggerError> {
        let request = ExecutionRequest::new(bucket, key, Utc::now())
            .map_err(|_| TriggerError::InvalidKey(key.to_string()))?
            .with_source(ExecutionSource::Retrigger);

        info!(bucket, key, execution_id = %request.execution_id, "Manual re-trigger");

        let result = self.claim_and_start(request).await?;
        match &result.outcome {
            RecordOutcome::Dropped { error } => Err(TriggerError::StartFailed {
                attempts: self.config.start_attempts,
                error: error.clone(),
            }),
            _ => Ok(result),
        }
    }

    async fn claim_and_start(&self, request: ExecutionRequest) -> Result<RecordResult, TriggerError> {
        let claim = self
            .status
            .claim_trigger(&trigger_key(&request), &request.execution_id)?;

        if let TriggerClaim::AlreadyClaimed { execution_id } = claim {
            info!(
                asset_id = %request.asset_id,
                key = %request.key,
                execution_id = %execution_id,
                "Duplicate event ignored"
            );
            if let Some(ref audit) = self.audit {
                audit
                    .emit(AuditEvent::TriggerDuplicate {
                        asset_id: request.asset_id.clone(),
                        key: request.key.clone(),
                        event_time: request.event_time,
                        execution_id: execution_id.clone(),
                    })
                    .await;
            }
            return Ok(self.result(&request, RecordOutcome::Duplicate { execution_id }));
        }

        match self.start_with_backoff(&request).await {
            Ok(execution_id) => Ok(self.result(&request, RecordOutcome::Started { execution_id })),
            Err((attempts, e)) => {
                self.drop_event(&request, attempts, &e).await?;
                Ok(self.result(&request, RecordOutcome::Dropped { error: e.to_string() }))
            }
        }
    }

    /// Call the engine, retrying transient failures with exponential backoff.
    async fn start_with_backoff(
        &self,
        request: &ExecutionRequest,
    ) -> Result<String, (u32, WorkflowError)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.starter.start(request.clone()).await {
                Ok(execution_id) => return Ok(execution_id),
                Err(e) if e.is_transient() && attempt < self.config.start_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        asset_id = %request.asset_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Workflow start failed, retrying: {}", e
                    );
                    metrics::TRIGGER_START_RETRIES.inc();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    async fn drop_event(
        &self,
        request: &ExecutionRequest,
        attempts: u32,
        e: &WorkflowError,
    ) -> Result<(), TriggerError> {
        error!(
            asset_id = %request.asset_id,
            key = %request.key,
            event_time = %request.event_time,
            attempts,
            "Dropping event, workflow could not be started: {}", e
        );

        self.status
            .release_trigger(&trigger_key(request), &request.execution_id)?;

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::TriggerDropped {
                    asset_id: request.asset_id.clone(),
                    key: request.key.clone(),
                    event_time: request.event_time,
                    attempts,
                    error: e.to_string(),
                })
                .await;
        }
        Ok(())
    }

    fn result(&self, request: &ExecutionRequest, outcome: RecordOutcome) -> RecordResult {
        metrics::TRIGGER_EVENTS
            .with_label_values(&[outcome.label()])
            .inc();
        RecordResult {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            asset_id: Some(request.asset_id.clone()),
            outcome,
        }
    }
}

fn trigger_key(request: &ExecutionRequest) -> TriggerKey<'_> {
    TriggerKey {
        asset_id: &request.asset_id,
        feature_type: request.feature_type,
        bucket: &request.bucket,
        object_key: &request.key,
        event_time: request.event_time,
    }
}

fn skipped(bucket: String, key: String, reason: String) -> RecordResult {
    metrics::TRIGGER_EVENTS.with_label_values(&["skipped"]).inc();
    RecordResult {
        bucket,
        key,
        asset_id: None,
        outcome: RecordOutcome::Skipped { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::FeatureType;
    use crate::status::SqliteStatusStore;
    use crate::testing::{fixtures, MockWorkflowStarter};

    fn trigger(starter: Arc<MockWorkflowStarter>) -> IngestTrigger {
        let config = TriggerConfig {
            start_backoff_ms: 1,
            start_backoff_cap_ms: 2,
            ..TriggerConfig::default()
        };
        IngestTrigger::new(
            config,
            starter,
            Arc::new(SqliteStatusStore::in_memory().unwrap()),
            None,
        )
    }

    #[tokio::test]
    async fn test_one_execution_per_event() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/42.png"]);
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.message, "Processed 1 of 1 events");
        let started = starter.started().await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].asset_id, "42");
        assert_eq!(started[0].bucket, "uploads");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/42.png"]);
        let first = trigger.handle_payload(body.as_bytes()).await.unwrap();
        let second = trigger.handle_payload(body.as_bytes()).await.unwrap();

        assert_eq!(first.processed, 1);
        assert_eq!(second.processed, 0);
        assert!(matches!(
            second.records[0].outcome,
            RecordOutcome::Duplicate { .. }
        ));
        assert_eq!(starter.started().await.len(), 1);
    }

    #[tokio::test]
    async fn test_objects_sharing_a_stem_start_separately() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/42.png", "docs/42.pdf"]);
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.message, "Processed 2 of 2 events");
        let started = starter.started().await;
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].feature_type, FeatureType::ImageMeta);
        assert_eq!(started[1].feature_type, FeatureType::DocumentMeta);
        assert!(started.iter().all(|r| r.asset_id == "42"));

        // Redelivery of the pair is still a no-op for both.
        let again = trigger.handle_payload(body.as_bytes()).await.unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(starter.started().await.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_keys_start_nothing() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification(
            "uploads",
            &["processed/42.json", "img/.hidden.png", "img/a.png.part", "img/"],
        );
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.total, 4);
        assert!(summary
            .records
            .iter()
            .all(|r| matches!(r.outcome, RecordOutcome::Skipped { .. })));
        assert!(starter.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_created_events_are_skipped() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/1.png"])
            .replace("ObjectCreated:Put", "ObjectRemoved:Delete");
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert!(starter.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_encoded_key_is_decoded() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/my+photo%281%29.png"]);
        trigger.handle_payload(body.as_bytes()).await.unwrap();

        let started = starter.started().await;
        assert_eq!(started[0].key, "img/my photo(1).png");
        assert_eq!(started[0].asset_id, "my photo(1)");
    }

    #[tokio::test]
    async fn test_transient_start_failures_are_retried() {
        let starter = Arc::new(MockWorkflowStarter::new());
        starter.fail_next(2).await;
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/1.png"]);
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(starter.calls().await, 3);
    }

    #[tokio::test]
    async fn test_exhausted_start_drops_and_releases_claim() {
        let starter = Arc::new(MockWorkflowStarter::new());
        starter.fail_next(5).await;
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/1.png"]);
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();
        assert!(matches!(
            summary.records[0].outcome,
            RecordOutcome::Dropped { .. }
        ));
        assert_eq!(starter.calls().await, 5);

        // Claim released: a redelivery starts the execution.
        let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_retrigger_starts_fresh_lineage() {
        let starter = Arc::new(MockWorkflowStarter::new());
        let trigger = trigger(starter.clone());

        let body = fixtures::notification("uploads", &["img/1.png"]);
        trigger.handle_payload(body.as_bytes()).await.unwrap();
        let result = trigger.retrigger("uploads", "img/1.png").await.unwrap();

        assert!(matches!(result.outcome, RecordOutcome::Started { .. }));
        let started = starter.started().await;
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].source, ExecutionSource::Retrigger);
        assert_ne!(started[0].execution_id, started[1].execution_id);
    }

    #[tokio::test]
    async fn test_retrigger_invalid_key() {
        let trigger = trigger(Arc::new(MockWorkflowStarter::new()));
        let err = trigger.retrigger("uploads", "img/").await.unwrap_err();
        assert!(matches!(err, TriggerError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let trigger = trigger(Arc::new(MockWorkflowStarter::new()));
        let err = trigger.handle_payload(b"not json").await.unwrap_err();
        assert!(matches!(err, TriggerError::InvalidNotification(_)));
    }
}
