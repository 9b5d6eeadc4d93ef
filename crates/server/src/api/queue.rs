//! Work queue API handlers.
//!
//! Downstream consumers receive with a long-poll, process, then
//! acknowledge with the receipt handle of that delivery.

use std::sync::Arc;
use std::time::Duration;

use assetflow_core::{queue::DeadLetter, Classify, QueueError, QueueStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::handlers::{api_error_with_code, ApiError};
use crate::state::AppState;

const MAX_DEAD_LETTER_LIMIT: i64 = 1000;
const DEFAULT_DEAD_LETTER_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    /// Opaque message body
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveParams {
    /// Long-poll wait; capped by the queue's `max_wait_secs`
    pub wait_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLettersResponse {
    pub queue: String,
    pub messages: Vec<DeadLetter>,
}

/// Enqueue a message
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnqueueBody>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let message_id = state.queue().enqueue(&body.body).await.map_err(queue_error)?;
    Ok((StatusCode::CREATED, Json(EnqueueResponse { message_id })))
}

/// Receive one message; 204 when nothing became visible within the wait
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReceiveParams>,
) -> Result<Response, ApiError> {
    let wait = Duration::from_secs(params.wait_secs.unwrap_or(0));

    match state.queue().dequeue(wait).await.map_err(queue_error)? {
        Some(message) => Ok(Json(message).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Acknowledge a delivery
pub async fn ack(
    State(state): State<Arc<AppState>>,
    Path(receipt): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.queue().ack(&receipt).await.map_err(queue_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<QueueStats>, ApiError> {
    state.queue().stats().await.map(Json).map_err(queue_error)
}

/// List quarantined messages, most recent first
pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);

    let messages = state
        .queue()
        .dead_letters(limit)
        .await
        .map_err(queue_error)?;

    Ok(Json(DeadLettersResponse {
        queue: state.queue().name().to_string(),
        messages,
    }))
}

/// Move a dead-lettered message back to the live queue
pub async fn redrive(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.queue().redrive(&message_id).await.map_err(queue_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn queue_error(e: QueueError) -> ApiError {
    let status = match e {
        QueueError::ReceiptNotFound(_) | QueueError::DeadLetterNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    api_error_with_code(status, e.to_string(), e.code())
}
