//! Workflow lifecycle integration tests.
//!
//! These tests drive executions end to end through the trigger, the engine,
//! the extraction worker, the status store and the work queue:
//! STARTED -> EXTRACTING -> EXTRACTED -> UPDATING_STATUS -> COMPLETED

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use assetflow_core::{
    extractor::ExtractionError,
    queue::{DeadLetter, QueueStats, ReceivedMessage},
    testing::{fixtures, MockExtractor, MockObjectStorage},
    workflow::{ExecutionSource, FeatureReadyMessage},
    AssetStatus, AssetType, ExecutionFilter, ExecutionRequest, ExecutionState, ExecutionStore,
    ExtractionWorker, ExtractorRegistry, FeatureType, IngestTrigger, QueueConfig, QueueError,
    SqliteExecutionStore, SqliteStatusStore, SqliteWorkQueue, StatusStore, StatusUpdater,
    StorageConfig, TriggerConfig, WorkQueue, WorkflowConfig, WorkflowEngine, WorkflowExecution,
};

const WAIT: Duration = Duration::from_secs(5);

/// Test helper wiring every component against one SQLite file.
struct TestHarness {
    storage: Arc<MockObjectStorage>,
    status: Arc<SqliteStatusStore>,
    executions: Arc<SqliteExecutionStore>,
    queue: Arc<SqliteWorkQueue>,
    registry: ExtractorRegistry,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        Self {
            storage: Arc::new(MockObjectStorage::new()),
            status: Arc::new(SqliteStatusStore::new(&db_path).expect("status store")),
            executions: Arc::new(SqliteExecutionStore::new(&db_path).expect("execution store")),
            queue: Arc::new(
                SqliteWorkQueue::new(&db_path, QueueConfig::default()).expect("work queue"),
            ),
            registry: ExtractorRegistry::with_defaults(),
            temp_dir,
        }
    }

    fn workflow_config() -> WorkflowConfig {
        WorkflowConfig {
            backoff_base_ms: 5,
            backoff_cap_ms: 20,
            resume_poll_interval_ms: 50,
            ..WorkflowConfig::default()
        }
    }

    fn engine_with_queue(&self, queue: Arc<dyn WorkQueue>) -> WorkflowEngine {
        let worker = ExtractionWorker::new(
            self.storage.clone(),
            self.registry.clone(),
            &StorageConfig::new(self.temp_dir.path()),
        );
        WorkflowEngine::new(
            Self::workflow_config(),
            self.executions.clone(),
            worker,
            StatusUpdater::new(self.status.clone()),
            queue,
            None,
        )
    }

    fn engine(&self) -> WorkflowEngine {
        self.engine_with_queue(self.queue.clone())
    }

    fn trigger(&self, engine: &WorkflowEngine) -> IngestTrigger {
        IngestTrigger::new(
            TriggerConfig::default(),
            Arc::new(engine.clone()),
            self.status.clone(),
            None,
        )
    }

    async fn run(&self, engine: &WorkflowEngine, key: &str) -> WorkflowExecution {
        let request = ExecutionRequest::new("uploads", key, Utc::now()).unwrap();
        let started = engine.start_execution(request).await.unwrap();
        engine
            .wait_for_terminal(&started.execution_id, WAIT)
            .await
            .unwrap()
    }
}

/// Queue whose enqueue always fails.
struct BrokenQueue;

#[async_trait]
impl WorkQueue for BrokenQueue {
    fn name(&self) -> &str {
        "broken"
    }

    async fn enqueue(&self, _body: &str) -> Result<String, QueueError> {
        Err(QueueError::Database("disk I/O error".to_string()))
    }

    async fn dequeue(&self, _max_wait: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        Ok(None)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        Err(QueueError::ReceiptNotFound(receipt_handle.to_string()))
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::default())
    }

    async fn dead_letters(&self, _limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(Vec::new())
    }

    async fn redrive(&self, message_id: &str) -> Result<(), QueueError> {
        Err(QueueError::DeadLetterNotFound(message_id.to_string()))
    }
}

#[tokio::test]
async fn test_image_upload_completes_with_one_queue_message() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/42.png", fixtures::png_bytes(100, 50))
        .await;
    let engine = h.engine();
    engine.start().await;

    let mut changes = h.status.subscribe_changes();
    let execution = h.run(&engine, "img/42.png").await;

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.asset_id, "42");
    assert!(execution.completed_at.is_some());

    let record = h.status.get("42", FeatureType::ImageMeta).unwrap().unwrap();
    assert_eq!(record.status, AssetStatus::Queued);
    assert_eq!(record.attempt, 1);
    assert_eq!(record.execution_id, execution.execution_id);

    // Change feed saw the progression in order.
    let mut seen = Vec::new();
    while let Ok(record) = changes.try_recv() {
        seen.push(record.status);
    }
    assert_eq!(
        seen,
        vec![
            AssetStatus::Pending,
            AssetStatus::Extracting,
            AssetStatus::Extracted,
            AssetStatus::Queued
        ]
    );

    let message = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    let body: FeatureReadyMessage = serde_json::from_str(&message.body).unwrap();
    assert_eq!(body.asset_id, "42");
    assert_eq!(body.feature_type, FeatureType::ImageMeta);
    assert_eq!(body.metadata.attributes["width"], serde_json::json!(100));
    assert_eq!(body.metadata.attributes["height"], serde_json::json!(50));
    h.queue.ack(&message.receipt_handle).await.unwrap();
    assert!(h.queue.dequeue(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleted_object_fails_without_retry() {
    let h = TestHarness::new();
    let engine = h.engine();
    engine.start().await;

    let execution = h.run(&engine, "img/deleted.png").await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.error_detail.as_deref(), Some("ObjectNotFound"));
    assert_eq!(execution.attempt, 1);
    assert_eq!(h.storage.head_calls().await, 1);

    let record = h
        .status
        .get("deleted", FeatureType::ImageMeta)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, AssetStatus::Failed);
    assert_eq!(record.error_detail.as_deref(), Some("ObjectNotFound"));
    assert_eq!(h.queue.stats().await.unwrap().visible, 0);
}

#[tokio::test]
async fn test_always_transient_failure_makes_exactly_three_attempts() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/1.png", fixtures::png_bytes(1, 1))
        .await;
    h.storage.set_always_fail(true).await;
    let engine = h.engine();
    engine.start().await;

    let execution = h.run(&engine, "img/1.png").await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.attempt, 3);
    assert_eq!(execution.error_detail.as_deref(), Some("TransientStorageError"));
    assert_eq!(h.storage.head_calls().await, 3);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/2.png", fixtures::png_bytes(4, 4))
        .await;
    h.storage.fail_next(2).await;
    let engine = h.engine();
    engine.start().await;

    let execution = h.run(&engine, "img/2.png").await;

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.attempt, 3);
}

#[tokio::test]
async fn test_unsupported_format_fails_immediately() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "bin/archive.zip", b"PK\x03\x04".to_vec())
        .await;
    let engine = h.engine();
    engine.start().await;

    let execution = h.run(&engine, "bin/archive.zip").await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.error_detail.as_deref(), Some("UnsupportedFormat"));
    assert_eq!(execution.attempt, 1);
    assert_eq!(execution.feature_type, FeatureType::ObjectMeta);
}

#[tokio::test]
async fn test_malformed_extractor_output_is_not_retried() {
    let mut h = TestHarness::new();
    let extractor = MockExtractor::new();
    extractor
        .push_error(ExtractionError::Malformed("bad header".to_string()))
        .await;
    h.registry = ExtractorRegistry::new().with(AssetType::Audio, Arc::new(extractor.clone()));
    h.storage
        .put("uploads", "audio/song.mp3", b"ID3".to_vec())
        .await;
    let engine = h.engine();
    engine.start().await;

    let execution = h.run(&engine, "audio/song.mp3").await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.error_detail.as_deref(), Some("MalformedObject"));
    assert_eq!(extractor.calls().await, 1);
}

#[tokio::test]
async fn test_enqueue_failure_keeps_extracted_status() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/5.png", fixtures::png_bytes(8, 8))
        .await;
    let engine = h.engine_with_queue(Arc::new(BrokenQueue));
    engine.start().await;

    let execution = h.run(&engine, "img/5.png").await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.error_detail.as_deref(), Some("EnqueueFailed"));
    assert!(execution.result.is_some());

    let record = h.status.get("5", FeatureType::ImageMeta).unwrap().unwrap();
    assert_eq!(record.status, AssetStatus::Extracted);
    assert_eq!(record.error_detail, None);
}

#[tokio::test]
async fn test_duplicate_notification_starts_one_execution() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/42.png", fixtures::png_bytes(100, 50))
        .await;
    let engine = h.engine();
    engine.start().await;
    let trigger = h.trigger(&engine);

    let body = fixtures::notification("uploads", &["img/42.png"]);
    let first = trigger.handle_payload(body.as_bytes()).await.unwrap();
    let second = trigger.handle_payload(body.as_bytes()).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(second.processed, 0);

    let executions = engine.list_executions(&ExecutionFilter::new()).unwrap();
    assert_eq!(executions.len(), 1);
    let done = engine
        .wait_for_terminal(&executions[0].execution_id, WAIT)
        .await
        .unwrap();
    assert_eq!(done.state, ExecutionState::Completed);

    // Redelivery after completion is still a no-op.
    let third = trigger.handle_payload(body.as_bytes()).await.unwrap();
    assert_eq!(third.processed, 0);
    assert_eq!(h.queue.stats().await.unwrap().visible, 1);
}

#[tokio::test]
async fn test_retrigger_starts_new_lineage() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/42.png", fixtures::png_bytes(100, 50))
        .await;
    let engine = h.engine();
    engine.start().await;
    let trigger = h.trigger(&engine);

    let first = h.run(&engine, "img/42.png").await;
    let result = trigger.retrigger("uploads", "img/42.png").await.unwrap();
    let json = serde_json::to_value(&result).unwrap();
    let execution_id = json["executionId"].as_str().unwrap().to_string();
    assert_ne!(execution_id, first.execution_id);

    let second = engine.wait_for_terminal(&execution_id, WAIT).await.unwrap();
    assert_eq!(second.state, ExecutionState::Completed);
    assert_eq!(second.source, ExecutionSource::Retrigger);

    let record = h.status.get("42", FeatureType::ImageMeta).unwrap().unwrap();
    assert_eq!(record.attempt, 2);
    assert_eq!(record.execution_id, execution_id);
    assert_eq!(record.status, AssetStatus::Queued);
}

#[tokio::test]
async fn test_restart_resumes_without_redoing_extraction() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/7.png", fixtures::png_bytes(3, 3))
        .await;

    // First run completes extraction; then simulate a crash at EXTRACTED.
    let engine = h.engine();
    engine.start().await;
    let done = h.run(&engine, "img/7.png").await;
    engine.stop().await;

    let request = ExecutionRequest::new("uploads", "img/7.png", Utc::now()).unwrap();
    let mut crashed = WorkflowExecution::from_request(&request);
    crashed.state = ExecutionState::Extracted;
    crashed.attempt = 1;
    crashed.result = done.result.clone();
    h.executions.create(&crashed).unwrap();
    let get_calls_before = h.storage.get_calls().await;

    let restarted = h.engine();
    restarted.start().await;
    let resumed = restarted
        .wait_for_terminal(&crashed.execution_id, WAIT)
        .await
        .unwrap();

    assert_eq!(resumed.state, ExecutionState::Completed);
    assert!(resumed.message_id.is_some());
    assert_eq!(h.storage.get_calls().await, get_calls_before);
    assert_eq!(h.queue.stats().await.unwrap().visible, 2);
}

#[tokio::test]
async fn test_restart_does_not_enqueue_twice() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/8.png", fixtures::png_bytes(3, 3))
        .await;

    let request = ExecutionRequest::new("uploads", "img/8.png", Utc::now()).unwrap();
    let mut crashed = WorkflowExecution::from_request(&request);
    crashed.state = ExecutionState::UpdatingStatus;
    crashed.attempt = 1;
    crashed.message_id = Some("already-sent".to_string());
    h.executions.create(&crashed).unwrap();

    let engine = h.engine();
    engine.start().await;
    let resumed = engine
        .wait_for_terminal(&crashed.execution_id, WAIT)
        .await
        .unwrap();

    assert_eq!(resumed.state, ExecutionState::Completed);
    assert_eq!(resumed.message_id.as_deref(), Some("already-sent"));
    assert_eq!(h.queue.stats().await.unwrap().visible, 0);
    assert_eq!(h.storage.head_calls().await, 0);
}

#[tokio::test]
async fn test_failed_execution_is_not_resumed() {
    let h = TestHarness::new();

    let request = ExecutionRequest::new("uploads", "img/9.png", Utc::now()).unwrap();
    let mut failed = WorkflowExecution::from_request(&request);
    failed.state = ExecutionState::Failed;
    failed.error_detail = Some("ObjectNotFound".to_string());
    failed.completed_at = Some(Utc::now());
    h.executions.create(&failed).unwrap();

    let engine = h.engine();
    engine.start().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let still = engine.get_execution(&failed.execution_id).unwrap();
    assert_eq!(still.state, ExecutionState::Failed);
    assert_eq!(h.storage.head_calls().await, 0);
}

#[tokio::test]
async fn test_objects_sharing_a_stem_in_one_notification_both_complete() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/42.png", fixtures::png_bytes(100, 50))
        .await;
    h.storage
        .put("uploads", "docs/42.pdf", b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n".to_vec())
        .await;
    let engine = h.engine();
    engine.start().await;
    let trigger = h.trigger(&engine);

    let body = fixtures::notification("uploads", &["img/42.png", "docs/42.pdf"]);
    let summary = trigger.handle_payload(body.as_bytes()).await.unwrap();
    assert_eq!(summary.processed, 2);

    let executions = engine.list_executions(&ExecutionFilter::new()).unwrap();
    assert_eq!(executions.len(), 2);
    for execution in &executions {
        let done = engine
            .wait_for_terminal(&execution.execution_id, WAIT)
            .await
            .unwrap();
        assert_eq!(done.state, ExecutionState::Completed, "{}", done.object_key);
        assert_eq!(done.asset_id, "42");
    }

    let records = h.status.list_for_asset("42").unwrap();
    let mut features: Vec<_> = records.iter().map(|r| r.feature_type).collect();
    features.sort_by_key(|f| f.as_str());
    assert_eq!(features, vec![FeatureType::DocumentMeta, FeatureType::ImageMeta]);
    assert!(records.iter().all(|r| r.status == AssetStatus::Queued));

    let document = h.status.get("42", FeatureType::DocumentMeta).unwrap().unwrap();
    let pdf = executions
        .iter()
        .find(|e| e.object_key == "docs/42.pdf")
        .unwrap();
    assert_eq!(document.execution_id, pdf.execution_id);
    assert_eq!(h.queue.stats().await.unwrap().visible, 2);

    // Redelivery of the same notification starts nothing new
    let again = trigger.handle_payload(body.as_bytes()).await.unwrap();
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn test_two_engines_drive_a_resumed_execution_once() {
    let h = TestHarness::new();
    h.storage
        .put("uploads", "img/11.png", fixtures::png_bytes(3, 3))
        .await;
    h.storage.set_delay(Duration::from_millis(30)).await;

    // Left behind by a crashed instance before any step ran
    let request = ExecutionRequest::new("uploads", "img/11.png", Utc::now()).unwrap();
    let crashed = WorkflowExecution::from_request(&request);
    h.executions.create(&crashed).unwrap();

    let first = h.engine();
    let second = h.engine();
    first.start().await;
    second.start().await;

    let done = first
        .wait_for_terminal(&crashed.execution_id, WAIT)
        .await
        .unwrap();
    assert_eq!(done.state, ExecutionState::Completed);

    // Let both resume loops sweep again after completion
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = second.get_execution(&crashed.execution_id).unwrap();
    assert_eq!(after.state, ExecutionState::Completed);
    assert_eq!(after.message_id, done.message_id);
    assert_eq!(after.attempt, 1);
    assert_eq!(h.storage.get_calls().await, 1);
    assert_eq!(h.queue.stats().await.unwrap().visible, 1);
}
