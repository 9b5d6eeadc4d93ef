//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Workflow engine (executions, durations, extraction attempts)
//! - Status store writes
//! - Work queue (enqueue, delivery, dead-lettering)
//! - Ingest trigger outcomes

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Workflow Engine
// =============================================================================

/// Executions created.
pub static EXECUTIONS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "assetflow_executions_started_total",
        "Total workflow executions started",
    )
    .unwrap()
});

/// Executions that reached a terminal state, by status.
pub static EXECUTIONS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_executions_finished_total",
            "Total workflow executions that reached a terminal state",
        ),
        &["status", "feature_type"], // status: "completed", "failed"
    )
    .unwrap()
});

/// Execution wall time from creation to terminal state.
pub static EXECUTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "assetflow_execution_duration_seconds",
            "Duration of workflow executions",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["status"],
    )
    .unwrap()
});

/// Extraction attempts by asset type and result.
pub static EXTRACTION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_extraction_attempts_total",
            "Total extraction worker invocations",
        ),
        &["asset_type", "result"], // result: "success", "transient", "fatal"
    )
    .unwrap()
});

/// Extraction duration in seconds.
pub static EXTRACTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "assetflow_extraction_duration_seconds",
            "Duration of a single extraction attempt",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        &["asset_type"],
    )
    .unwrap()
});

/// Step retries scheduled by the engine.
pub static STEP_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_step_retries_total", "Total step retries"),
        &["step"],
    )
    .unwrap()
});

// =============================================================================
// Status Store
// =============================================================================

/// Status writes by upsert outcome.
pub static STATUS_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_status_writes_total", "Total status writes"),
        &["status", "outcome"], // outcome: "inserted", "updated", "unchanged", "stale"
    )
    .unwrap()
});

// =============================================================================
// Work Queue
// =============================================================================

/// Messages accepted by the queue.
pub static QUEUE_ENQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_queue_enqueued_total", "Total messages enqueued"),
        &["queue"],
    )
    .unwrap()
});

/// Message deliveries, including redeliveries.
pub static QUEUE_DELIVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_queue_delivered_total",
            "Total message deliveries",
        ),
        &["queue"],
    )
    .unwrap()
});

/// Messages acknowledged.
pub static QUEUE_ACKED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_queue_acked_total", "Total messages acknowledged"),
        &["queue"],
    )
    .unwrap()
});

/// Messages moved to the dead-letter queue.
pub static QUEUE_DEAD_LETTERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_queue_dead_lettered_total",
            "Total messages moved to the dead-letter queue",
        ),
        &["queue"],
    )
    .unwrap()
});

// =============================================================================
// Ingest Trigger
// =============================================================================

/// Notification records by outcome.
pub static TRIGGER_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_trigger_events_total",
            "Total object-created records handled by the ingest trigger",
        ),
        &["outcome"], // "started", "duplicate", "skipped", "dropped", "invalid"
    )
    .unwrap()
});

/// Engine start retries performed by the trigger.
pub static TRIGGER_START_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "assetflow_trigger_start_retries_total",
        "Total retried workflow start calls",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Workflow
        Box::new(EXECUTIONS_STARTED.clone()),
        Box::new(EXECUTIONS_FINISHED.clone()),
        Box::new(EXECUTION_DURATION.clone()),
        Box::new(EXTRACTION_ATTEMPTS.clone()),
        Box::new(EXTRACTION_DURATION.clone()),
        Box::new(STEP_RETRIES.clone()),
        // Status
        Box::new(STATUS_WRITES.clone()),
        // Queue
        Box::new(QUEUE_ENQUEUED.clone()),
        Box::new(QUEUE_DELIVERED.clone()),
        Box::new(QUEUE_ACKED.clone()),
        Box::new(QUEUE_DEAD_LETTERED.clone()),
        // Trigger
        Box::new(TRIGGER_EVENTS.clone()),
        Box::new(TRIGGER_START_RETRIES.clone()),
    ]
}
