//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the assetflow server:
//! - HTTP request metrics (latency, counts, rejected ingest calls)
//! - WebSocket connection metrics
//! - Asset status, execution and queue depth gauges (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::warn;

use assetflow_core::{AssetStatus, ExecutionState, StatusFilter};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "assetflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "assetflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Ingest requests rejected by the token check.
pub static INGEST_AUTH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "assetflow_ingest_auth_failures_total",
            "Ingest requests rejected by the token check",
        ),
        &["reason"], // "missing_token", "invalid_token"
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "assetflow_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "assetflow_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("assetflow_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "assetflow_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// State gauges (collected dynamically)
// =============================================================================

/// Status records by current status.
pub static ASSETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("assetflow_assets_by_status", "Current status record count by status"),
        &["status"],
    )
    .unwrap()
});

/// Stored executions by state.
pub static EXECUTIONS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("assetflow_executions_by_state", "Stored executions by state"),
        &["state"],
    )
    .unwrap()
});

/// Executions currently being driven.
pub static EXECUTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "assetflow_executions_active",
        "Number of executions currently being driven by the engine",
    )
    .unwrap()
});

/// Workflow engine running state (1 = running, 0 = stopped).
pub static ENGINE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "assetflow_engine_running",
        "Whether the workflow engine is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Queue depth by message state.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("assetflow_queue_depth", "Work queue depth by message state"),
        &["state"], // "visible", "in_flight", "dead_lettered"
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(INGEST_AUTH_FAILURES.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // State gauges
    registry
        .register(Box::new(ASSETS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(EXECUTIONS_BY_STATE.clone()))
        .unwrap();
    registry
        .register(Box::new(EXECUTIONS_ACTIVE.clone()))
        .unwrap();
    registry.register(Box::new(ENGINE_RUNNING.clone())).unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();

    // Core metrics (engine, status writes, queue, trigger)
    for metric in assetflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the stores at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let engine = state.engine().status();
    ENGINE_RUNNING.set(if engine.running { 1 } else { 0 });
    EXECUTIONS_ACTIVE.set(engine.active as i64);
    for execution_state in ExecutionState::ALL {
        let count = engine
            .counts
            .get(execution_state.as_str())
            .copied()
            .unwrap_or(0);
        EXECUTIONS_BY_STATE
            .with_label_values(&[execution_state.as_str()])
            .set(count);
    }

    for status in AssetStatus::ALL {
        let filter = StatusFilter::new().with_status(status);
        if let Ok(count) = state.status_store().count(&filter) {
            ASSETS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count);
        }
    }

    match state.queue().stats().await {
        Ok(stats) => {
            QUEUE_DEPTH.with_label_values(&["visible"]).set(stats.visible);
            QUEUE_DEPTH.with_label_values(&["in_flight"]).set(stats.in_flight);
            QUEUE_DEPTH
                .with_label_values(&["dead_lettered"])
                .set(stats.dead_lettered);
        }
        Err(e) => warn!("Failed to read queue stats for metrics: {}", e),
    }
}

static UUID_SEGMENT: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

static NUMERIC_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
///
/// Asset ids are arbitrary file stems, so the segment after `/assets/` is
/// always collapsed.
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");

    let mut segments: Vec<&str> = result.split('/').collect();
    if let Some(pos) = segments.iter().position(|s| *s == "assets") {
        if let Some(segment) = segments.get_mut(pos + 1) {
            if !segment.is_empty() {
                *segment = "{asset_id}";
            }
        }
    }
    segments.join("/")
}
