use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::middleware::{ingest_token_middleware, metrics_middleware};
use super::{assets, audit, events, executions, handlers, queue, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Ingest routes, guarded by the ingest token when one is configured
    let ingest_routes = Router::new()
        .route("/events", post(events::ingest_events))
        .route("/retrigger", post(events::retrigger))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ingest_token_middleware,
        ));

    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Workflow
        .route("/executions", get(executions::list_executions))
        .route("/executions/{id}", get(executions::get_execution))
        .route("/workflow/status", get(handlers::workflow_status))
        // Asset status
        .route("/assets", get(assets::list_assets))
        .route("/assets/{asset_id}", get(assets::get_asset))
        .route("/assets/{asset_id}/{feature}", get(assets::get_asset_feature))
        // Work queue
        .route("/queue/messages", post(queue::enqueue))
        .route("/queue/receive", post(queue::receive))
        .route("/queue/receipts/{receipt}", delete(queue::ack))
        .route("/queue/stats", get(queue::stats))
        .route("/queue/dead-letters", get(queue::list_dead_letters))
        .route("/queue/dead-letters/{id}/redrive", post(queue::redrive))
        // Audit and live feed
        .route("/audit", get(audit::query_audit))
        .route("/ws", get(ws::ws_handler))
        .merge(ingest_routes)
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
