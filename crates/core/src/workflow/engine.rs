//! Workflow engine.
//!
//! Drives each execution through the state machine:
//! - Extraction: retried on transient errors with exponential backoff
//! - Status writes: every step is mirrored into the status store
//! - Publish: one queue message per completed extraction
//!
//! Progress is persisted after every step, so a restarted engine resumes an
//! execution at its last recorded state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::extractor::{ExtractionRequest, ExtractionWorker};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::retry::{Backoff, Classify};
use crate::status::{AssetStatus, StatusUpdate, StatusUpdater};
use crate::trigger::WorkflowStarter;

use super::config::WorkflowConfig;
use super::store::{ExecutionStore, ExecutionStoreError, Lease};
use super::types::{
    ExecutionFilter, ExecutionRequest, ExecutionState, FeatureReadyMessage, WorkflowError,
    WorkflowExecution, WorkflowStatus,
};

/// Resume sweep batch size.
const RESUME_BATCH: i64 = 100;

/// Why a step did not advance the execution.
enum StepError {
    /// Terminal failure with a stable error code.
    Failed {
        code: &'static str,
        detail: String,
        /// Whether `FAILED` is written to the status store.
        record_status: bool,
    },
    /// Shutdown while waiting; the execution stays resumable.
    Interrupted,
    /// Progress could not be persisted; the execution stays resumable.
    Store(ExecutionStoreError),
}

impl StepError {
    fn failed(code: &'static str, detail: impl Into<String>) -> Self {
        StepError::Failed {
            code,
            detail: detail.into(),
            record_status: true,
        }
    }
}

impl From<ExecutionStoreError> for StepError {
    fn from(e: ExecutionStoreError) -> Self {
        StepError::Store(e)
    }
}

struct EngineInner {
    config: WorkflowConfig,
    executions: Arc<dyn ExecutionStore>,
    worker: ExtractionWorker,
    updater: StatusUpdater,
    queue: Arc<dyn WorkQueue>,
    audit: Option<AuditHandle>,
    backoff: Backoff,
    lease: Lease,

    // Runtime state
    running: AtomicBool,
    permits: Arc<Semaphore>,
    active: Mutex<HashSet<String>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// The workflow engine. Cheap to clone; clones share one runtime.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowConfig,
        executions: Arc<dyn ExecutionStore>,
        worker: ExtractionWorker,
        updater: StatusUpdater,
        queue: Arc<dyn WorkQueue>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        let backoff = config.backoff();
        let lease = Lease::random(config.lease_ttl());

        Self {
            inner: Arc::new(EngineInner {
                config,
                executions,
                worker,
                updater,
                queue,
                audit,
                backoff,
                lease,
                running: AtomicBool::new(false),
                permits,
                active: Mutex::new(HashSet::new()),
                shutdown_tx,
            }),
        }
    }

    /// Start accepting executions and resume unfinished ones.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Workflow engine already running");
            return;
        }

        info!("Starting workflow engine");

        if self.inner.config.resume_on_start {
            let resumed = Arc::clone(&self.inner).resume_unfinished();
            if resumed > 0 {
                info!("Resumed {} unfinished executions", resumed);
            }
            self.spawn_resume_loop();
        }

        info!("Workflow engine started");
    }

    /// Stop the engine. In-flight executions stop at the next step boundary.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Workflow engine not running");
            return;
        }

        info!("Stopping workflow engine");
        let _ = self.inner.shutdown_tx.send(());
        info!("Workflow engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Create an execution and start driving it.
    ///
    /// Idempotent on `execution_id`: a second call returns the stored execution.
    pub async fn start_execution(
        &self,
        request: ExecutionRequest,
    ) -> Result<WorkflowExecution, WorkflowError> {
        if !self.is_running() {
            return Err(WorkflowError::NotRunning);
        }

        if let Some(existing) = self.inner.executions.get(&request.execution_id)? {
            debug!(execution_id = %existing.execution_id, "Execution already exists");
            return Ok(existing);
        }

        let execution = WorkflowExecution::from_request(&request);
        match self.inner.executions.create(&execution) {
            Ok(()) => {}
            Err(ExecutionStoreError::AlreadyExists(id)) => {
                return self
                    .inner
                    .executions
                    .get(&id)?
                    .ok_or(WorkflowError::ExecutionNotFound(id));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::EXECUTIONS_STARTED.inc();
        info!(
            execution_id = %execution.execution_id,
            asset_id = %execution.asset_id,
            feature_type = %execution.feature_type,
            key = %execution.object_key,
            "Execution started"
        );

        if let Err(e) = self.inner.updater.record(StatusUpdate::new(
            &execution.asset_id,
            execution.feature_type,
            AssetStatus::Pending,
            &execution.execution_id,
        )) {
            warn!(
                execution_id = %execution.execution_id,
                "Failed to record PENDING status: {}", e
            );
        }

        if let Some(ref audit) = self.inner.audit {
            audit
                .emit(AuditEvent::ExecutionStarted {
                    execution_id: execution.execution_id.clone(),
                    asset_id: execution.asset_id.clone(),
                    feature_type: execution.feature_type.to_string(),
                    bucket: execution.bucket.clone(),
                    key: execution.object_key.clone(),
                    event_time: execution.event_time,
                    source: execution.source.as_str().to_string(),
                })
                .await;
        }

        Arc::clone(&self.inner).spawn_drive(execution.execution_id.clone());

        Ok(execution)
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution, WorkflowError> {
        self.inner
            .executions
            .get(execution_id)?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    pub fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        Ok(self.inner.executions.list(filter)?)
    }

    pub fn count_executions(&self, filter: &ExecutionFilter) -> Result<i64, WorkflowError> {
        Ok(self.inner.executions.count(filter)?)
    }

    /// Running flag and execution counts per state.
    pub fn status(&self) -> WorkflowStatus {
        let active = self.inner.active.lock().unwrap().len();
        let counts = self
            .inner
            .executions
            .count_by_state()
            .unwrap_or_default()
            .into_iter()
            .map(|(state, n)| (state.as_str().to_string(), n))
            .collect();

        WorkflowStatus {
            running: self.is_running(),
            active,
            counts,
        }
    }

    /// Poll until the execution reaches a terminal state or the timeout elapses.
    pub async fn wait_for_terminal(
        &self,
        execution_id: &str,
        timeout: Duration,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let execution = self.get_execution(execution_id)?;
            if execution.state.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(execution);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn spawn_resume_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let interval = Duration::from_millis(inner.config.resume_poll_interval_ms.max(1));
        let mut shutdown_rx = inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Resume loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !inner.running.load(Ordering::Relaxed) {
                            break;
                        }
                        Arc::clone(&inner).resume_unfinished();
                    }
                }
            }
            debug!("Resume loop stopped");
        });
    }
}

#[async_trait]
impl WorkflowStarter for WorkflowEngine {
    async fn start(&self, request: ExecutionRequest) -> Result<String, WorkflowError> {
        self.start_execution(request)
            .await
            .map(|execution| execution.execution_id)
    }
}

impl EngineInner {
    /// Spawn a driver for every stored non-terminal execution not already active.
    fn resume_unfinished(self: Arc<Self>) -> usize {
        let executions = match self.executions.list_resumable(RESUME_BATCH) {
            Ok(executions) => executions,
            Err(e) => {
                error!("Failed to list resumable executions: {}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for execution in executions {
            if Arc::clone(&self).spawn_drive(execution.execution_id) {
                resumed += 1;
            }
        }
        resumed
    }

    /// Returns false when the execution already has a driver in this engine.
    ///
    /// The driver works on the stored execution, taken under this engine's
    /// lease, so a terminal execution or one driven by another engine is
    /// left alone.
    fn spawn_drive(self: Arc<Self>, execution_id: String) -> bool {
        if !self.active.lock().unwrap().insert(execution_id.clone()) {
            return false;
        }

        tokio::spawn(async move {
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(_permit) => match self.executions.acquire(&execution_id, &self.lease) {
                    Ok(Some(execution)) => self.drive(execution).await,
                    Ok(None) => debug!(
                        execution_id = %execution_id,
                        "Execution terminal or leased elsewhere, not driving"
                    ),
                    Err(e) => error!(
                        execution_id = %execution_id,
                        "Failed to acquire execution: {}", e
                    ),
                },
                Err(_) => error!(execution_id = %execution_id, "Execution semaphore closed"),
            }
            self.active.lock().unwrap().remove(&execution_id);
        });
        true
    }

    /// Stop driving after a step could not complete. The lease is given up
    /// unless it is already lost, so another engine can resume right away.
    fn suspend(&self, execution: &WorkflowExecution, error: Option<ExecutionStoreError>) {
        match error {
            Some(ExecutionStoreError::LostOwnership(_)) => {
                warn!(
                    execution_id = %execution.execution_id,
                    "Execution taken over or finished elsewhere, stopping"
                );
                return;
            }
            Some(e) => error!(
                execution_id = %execution.execution_id,
                "Failed to persist execution progress, leaving for resume: {}", e
            ),
            None => debug!(execution_id = %execution.execution_id, "Execution suspended"),
        }

        if let Err(e) = self.executions.release(&execution.execution_id, &self.lease) {
            warn!(execution_id = %execution.execution_id, "Failed to release lease: {}", e);
        }
    }

    /// Run one execution to a terminal state, or until it must suspend.
    async fn drive(&self, mut execution: WorkflowExecution) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !execution.state.is_terminal() {
            if !self.running.load(Ordering::Relaxed) {
                self.suspend(&execution, None);
                return;
            }

            let step = match execution.state {
                ExecutionState::Started => self.begin_extraction(&mut execution, &mut shutdown_rx).await,
                ExecutionState::Extracting => self.run_extraction(&mut execution, &mut shutdown_rx).await,
                ExecutionState::Extracted => self.record_extracted(&mut execution, &mut shutdown_rx).await,
                ExecutionState::UpdatingStatus => self.publish(&mut execution, &mut shutdown_rx).await,
                ExecutionState::Completed | ExecutionState::Failed => break,
            };

            match step {
                Ok(()) => {}
                Err(StepError::Failed {
                    code,
                    detail,
                    record_status,
                }) => {
                    self.fail(&mut execution, code, &detail, record_status, &mut shutdown_rx)
                        .await;
                    return;
                }
                Err(StepError::Interrupted) => {
                    self.suspend(&execution, None);
                    return;
                }
                Err(StepError::Store(e)) => {
                    self.suspend(&execution, Some(e));
                    return;
                }
            }
        }

        if execution.state == ExecutionState::Completed {
            self.finish(&execution).await;
        }
    }

    async fn begin_extraction(
        &self,
        execution: &mut WorkflowExecution,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StepError> {
        self.transition(execution, ExecutionState::Extracting, None)
            .await?;
        self.write_status(execution, AssetStatus::Extracting, shutdown_rx)
            .await
    }

    async fn run_extraction(
        &self,
        execution: &mut WorkflowExecution,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StepError> {
        let request = ExtractionRequest {
            execution_id: execution.execution_id.clone(),
            asset_id: execution.asset_id.clone(),
            bucket: execution.bucket.clone(),
            key: execution.object_key.clone(),
        };
        let max_attempts = self.config.max_attempts;

        loop {
            if execution.attempt >= max_attempts {
                return Err(StepError::failed(
                    "RetriesExhausted",
                    format!("{} extraction attempts already made", execution.attempt),
                ));
            }

            // Counted before the call so a crash mid-attempt still uses it up.
            let attempt = execution.attempt + 1;
            execution.attempt = attempt;
            execution.updated_at = Utc::now();
            self.executions.save(execution, &self.lease)?;

            let result = self.worker.extract(&request).await;

            match result {
                Ok(metadata) => {
                    execution.result = Some(metadata);
                    return self
                        .transition(execution, ExecutionState::Extracted, None)
                        .await;
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        execution_id = %execution.execution_id,
                        asset_id = %execution.asset_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Extraction failed transiently, retrying: {}", e
                    );
                    metrics::STEP_RETRIES.with_label_values(&["extract"]).inc();
                    self.transition(
                        execution,
                        ExecutionState::Extracting,
                        Some(format!("retry after {}", e.code())),
                    )
                    .await?;
                    pause(delay, shutdown_rx).await?;
                }
                Err(e) => return Err(StepError::failed(e.code(), e.to_string())),
            }
        }
    }

    async fn record_extracted(
        &self,
        execution: &mut WorkflowExecution,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StepError> {
        self.write_status(execution, AssetStatus::Extracted, shutdown_rx)
            .await?;
        self.transition(execution, ExecutionState::UpdatingStatus, None)
            .await
    }

    /// Enqueue the feature-ready message, then record `QUEUED`.
    ///
    /// An enqueue failure leaves the status at `EXTRACTED`.
    async fn publish(
        &self,
        execution: &mut WorkflowExecution,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StepError> {
        if execution.message_id.is_none() {
            let message_id = self.enqueue_result(execution, shutdown_rx).await?;
            execution.message_id = Some(message_id);
            execution.updated_at = Utc::now();
            self.executions.save(execution, &self.lease)?;
        }

        self.write_status(execution, AssetStatus::Queued, shutdown_rx)
            .await?;
        self.transition(execution, ExecutionState::Completed, None)
            .await
    }

    async fn enqueue_result(
        &self,
        execution: &WorkflowExecution,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<String, StepError> {
        let enqueue_failed = |detail: String| StepError::Failed {
            code: "EnqueueFailed",
            detail,
            record_status: false,
        };

        let metadata = execution
            .result
            .clone()
            .ok_or_else(|| enqueue_failed("no extraction result recorded".to_string()))?;
        let message = FeatureReadyMessage {
            execution_id: execution.execution_id.clone(),
            asset_id: execution.asset_id.clone(),
            feature_type: execution.feature_type,
            status: AssetStatus::Extracted,
            metadata,
            extracted_at: execution.updated_at,
        };
        let body = serde_json::to_string(&message).map_err(|e| enqueue_failed(e.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.queue.enqueue(&body).await {
                Ok(message_id) => {
                    debug!(
                        execution_id = %execution.execution_id,
                        message_id = %message_id,
                        queue = self.queue.name(),
                        "Feature message enqueued"
                    );
                    return Ok(message_id);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        execution_id = %execution.execution_id,
                        attempt,
                        "Enqueue failed, retrying: {}", e
                    );
                    metrics::STEP_RETRIES.with_label_values(&["enqueue"]).inc();
                    pause(self.backoff.delay(attempt), shutdown_rx).await?;
                }
                Err(e) => return Err(enqueue_failed(e.to_string())),
            }
        }
    }

    /// Write the execution's status, retrying transient store errors.
    async fn write_status(
        &self,
        execution: &WorkflowExecution,
        status: AssetStatus,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StepError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut update = StatusUpdate::new(
                &execution.asset_id,
                execution.feature_type,
                status,
                &execution.execution_id,
            );
            if status == AssetStatus::Failed {
                if let Some(ref detail) = execution.error_detail {
                    update = update.with_error(detail.clone());
                }
            }

            match self.updater.record(update) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        execution_id = %execution.execution_id,
                        status = %status,
                        attempt,
                        "Status write failed, retrying: {}", e
                    );
                    metrics::STEP_RETRIES.with_label_values(&["status"]).inc();
                    pause(self.backoff.delay(attempt), shutdown_rx).await?;
                }
                Err(e) => return Err(StepError::failed("StatusWriteFailed", e.to_string())),
            }
        }
    }

    /// Persist a state change and record it in the audit trail.
    async fn transition(
        &self,
        execution: &mut WorkflowExecution,
        to: ExecutionState,
        reason: Option<String>,
    ) -> Result<(), StepError> {
        let from = execution.state;
        if !from.can_transition_to(to) {
            let err = WorkflowError::InvalidTransition { from, to };
            return Err(StepError::failed(err.code(), err.to_string()));
        }

        let now = Utc::now();
        execution.state = to;
        execution.updated_at = now;
        if to.is_terminal() {
            execution.completed_at = Some(now);
        }
        self.executions.save(execution, &self.lease)?;

        debug!(
            execution_id = %execution.execution_id,
            from = %from,
            to = %to,
            "Execution state changed"
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::ExecutionStateChanged {
                    execution_id: execution.execution_id.clone(),
                    asset_id: execution.asset_id.clone(),
                    from_state: from.as_str().to_string(),
                    to_state: to.as_str().to_string(),
                    reason,
                })
                .await;
        }

        Ok(())
    }

    async fn fail(
        &self,
        execution: &mut WorkflowExecution,
        code: &'static str,
        detail: &str,
        record_status: bool,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        execution.error_detail = Some(code.to_string());

        let reason = Some(format!("{}: {}", code, detail));
        match self
            .transition(execution, ExecutionState::Failed, reason)
            .await
        {
            Ok(()) => {}
            Err(StepError::Store(e)) => {
                self.suspend(execution, Some(e));
                return;
            }
            Err(_) => return,
        }

        if record_status {
            if let Err(StepError::Failed { detail, .. }) = self
                .write_status(execution, AssetStatus::Failed, shutdown_rx)
                .await
            {
                error!(
                    execution_id = %execution.execution_id,
                    "Failed to record FAILED status: {}", detail
                );
            }
        }

        self.finish(execution).await;
    }

    /// Emit the terminal record: one log line, metrics and an audit event.
    async fn finish(&self, execution: &WorkflowExecution) {
        let elapsed_ms = execution.elapsed_ms();
        let status = match execution.state {
            ExecutionState::Completed => "completed",
            _ => "failed",
        };

        metrics::EXECUTIONS_FINISHED
            .with_label_values(&[status, execution.feature_type.as_str()])
            .inc();
        metrics::EXECUTION_DURATION
            .with_label_values(&[status])
            .observe(elapsed_ms as f64 / 1000.0);

        if execution.state == ExecutionState::Completed {
            info!(
                execution_id = %execution.execution_id,
                asset_id = %execution.asset_id,
                feature_type = %execution.feature_type,
                status,
                attempts = execution.attempt,
                elapsed_ms,
                "Execution completed"
            );
        } else {
            warn!(
                execution_id = %execution.execution_id,
                asset_id = %execution.asset_id,
                feature_type = %execution.feature_type,
                status,
                error_detail = execution.error_detail.as_deref().unwrap_or(""),
                attempts = execution.attempt,
                elapsed_ms,
                "Execution failed"
            );
        }

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::ExecutionFinished {
                    execution_id: execution.execution_id.clone(),
                    asset_id: execution.asset_id.clone(),
                    feature_type: execution.feature_type.to_string(),
                    status: status.to_string(),
                    error_detail: execution.error_detail.clone(),
                    attempts: execution.attempt,
                    elapsed_ms,
                })
                .await;
        }
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
async fn pause(
    delay: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(), StepError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Err(StepError::Interrupted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractorRegistry;
    use crate::queue::{QueueConfig, SqliteWorkQueue};
    use crate::status::{SqliteStatusStore, StatusStore};
    use crate::storage::StorageConfig;
    use crate::testing::{fixtures, MockObjectStorage};
    use crate::workflow::SqliteExecutionStore;

    struct Harness {
        engine: WorkflowEngine,
        storage: Arc<MockObjectStorage>,
        status: Arc<SqliteStatusStore>,
        queue: Arc<SqliteWorkQueue>,
        executions: Arc<SqliteExecutionStore>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MockObjectStorage::new());
        let status = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let queue = Arc::new(SqliteWorkQueue::in_memory(QueueConfig::default()).unwrap());
        let worker = ExtractionWorker::new(
            storage.clone(),
            ExtractorRegistry::with_defaults(),
            &StorageConfig::new("/unused"),
        );
        let config = WorkflowConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
            resume_on_start: false,
            ..WorkflowConfig::default()
        };

        let executions = Arc::new(SqliteExecutionStore::in_memory().unwrap());
        let engine = WorkflowEngine::new(
            config,
            executions.clone(),
            worker,
            StatusUpdater::new(status.clone()),
            queue.clone(),
            None,
        );

        Harness {
            engine,
            storage,
            status,
            queue,
            executions,
        }
    }

    #[tokio::test]
    async fn test_start_execution_requires_running_engine() {
        let h = harness();
        let request = ExecutionRequest::new("uploads", "img/1.png", Utc::now()).unwrap();
        let err = h.engine.start_execution(request).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotRunning));
    }

    #[tokio::test]
    async fn test_image_execution_completes() {
        let h = harness();
        h.storage
            .put("uploads", "img/42.png", fixtures::png_bytes(100, 50))
            .await;
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/42.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        let done = h
            .engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(done.state, ExecutionState::Completed);
        assert_eq!(done.attempt, 1);
        assert!(done.message_id.is_some());
        let metadata = done.result.unwrap();
        assert_eq!(metadata.attributes["width"], serde_json::json!(100));

        let record = h
            .status
            .get("42", crate::asset::FeatureType::ImageMeta)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssetStatus::Queued);
        assert_eq!(h.queue.stats().await.unwrap().visible, 1);
    }

    #[tokio::test]
    async fn test_start_execution_is_idempotent_on_id() {
        let h = harness();
        h.storage
            .put("uploads", "img/7.png", fixtures::png_bytes(1, 1))
            .await;
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/7.png", Utc::now()).unwrap();
        let first = h.engine.start_execution(request.clone()).await.unwrap();
        let second = h.engine.start_execution(request).await.unwrap();
        assert_eq!(first.execution_id, second.execution_id);

        h.engine
            .wait_for_terminal(&first.execution_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            h.engine.count_executions(&ExecutionFilter::new()).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_object_fails_without_retry() {
        let h = harness();
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/gone.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        let done = h
            .engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(done.state, ExecutionState::Failed);
        assert_eq!(done.error_detail.as_deref(), Some("ObjectNotFound"));
        assert_eq!(done.attempt, 1);
        assert!(done.completed_at.is_some());

        let record = h
            .status
            .get("gone", crate::asset::FeatureType::ImageMeta)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssetStatus::Failed);
        assert_eq!(record.error_detail.as_deref(), Some("ObjectNotFound"));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let h = harness();
        h.storage
            .put("uploads", "img/9.png", fixtures::png_bytes(1, 1))
            .await;
        h.storage.set_always_fail(true).await;
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/9.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        let done = h
            .engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(done.state, ExecutionState::Failed);
        assert_eq!(done.attempt, 3);
        assert_eq!(done.error_detail.as_deref(), Some("TransientStorageError"));
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let h = harness();
        h.engine.start().await;
        let request = ExecutionRequest::new("uploads", "img/none.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        h.engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();

        let status = h.engine.status();
        assert!(status.running);
        assert_eq!(status.counts.get("FAILED"), Some(&1));

        h.engine.stop().await;
        assert!(!h.engine.status().running);
    }

    #[tokio::test]
    async fn test_redriving_a_completed_execution_is_a_no_op() {
        let h = harness();
        h.storage
            .put("uploads", "img/42.png", fixtures::png_bytes(4, 4))
            .await;
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/42.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        let done = h
            .engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.state, ExecutionState::Completed);

        // A late resume sweep still holding the id must not publish again
        assert!(Arc::clone(&h.engine.inner).spawn_drive(started.execution_id.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let after = h.engine.get_execution(&started.execution_id).unwrap();
        assert_eq!(after.state, ExecutionState::Completed);
        assert_eq!(after.message_id, done.message_id);
        assert_eq!(h.queue.stats().await.unwrap().visible, 1);
        assert_eq!(h.storage.get_calls().await, 1);
    }

    #[tokio::test]
    async fn test_attempt_is_persisted_before_extraction_runs() {
        let h = harness();
        h.storage
            .put("uploads", "img/5.png", fixtures::png_bytes(2, 2))
            .await;
        h.storage.set_delay(Duration::from_millis(300)).await;
        h.engine.start().await;

        let request = ExecutionRequest::new("uploads", "img/5.png", Utc::now()).unwrap();
        let started = h.engine.start_execution(request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let in_flight = h.executions.get(&started.execution_id).unwrap().unwrap();
        assert_eq!(in_flight.state, ExecutionState::Extracting);
        assert_eq!(in_flight.attempt, 1);

        let done = h
            .engine
            .wait_for_terminal(&started.execution_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.state, ExecutionState::Completed);
        assert_eq!(done.attempt, 1);
    }

    #[tokio::test]
    async fn test_resumed_execution_with_spent_attempts_fails_without_reading() {
        let h = harness();
        h.storage
            .put("uploads", "img/8.png", fixtures::png_bytes(2, 2))
            .await;

        // Crashed mid-extraction on its last attempt
        let request = ExecutionRequest::new("uploads", "img/8.png", Utc::now()).unwrap();
        let mut crashed = WorkflowExecution::from_request(&request);
        crashed.state = ExecutionState::Extracting;
        crashed.attempt = 3;
        h.executions.create(&crashed).unwrap();

        h.engine.start().await;
        assert!(Arc::clone(&h.engine.inner).spawn_drive(crashed.execution_id.clone()));
        let done = h
            .engine
            .wait_for_terminal(&crashed.execution_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(done.state, ExecutionState::Failed);
        assert_eq!(done.error_detail.as_deref(), Some("RetriesExhausted"));
        assert_eq!(done.attempt, 3);
        assert_eq!(h.storage.head_calls().await, 0);
        assert_eq!(h.storage.get_calls().await, 0);
    }
}
