//! Ingest endpoints: storage notifications and manual re-triggers.

use std::sync::Arc;

use assetflow_core::{trigger::RecordResult, Classify, IngestSummary, TriggerError};
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::warn;

use super::handlers::{api_error, api_error_with_code, ApiError};
use crate::state::AppState;

/// Request body for a manual re-trigger
#[derive(Debug, Deserialize)]
pub struct RetriggerBody {
    pub bucket: String,
    pub key: String,
}

/// Accept an object-created notification envelope.
///
/// A 5xx answer tells the sender to redeliver; records that already
/// started are deduplicated on the second pass.
pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IngestSummary>, ApiError> {
    state
        .trigger()
        .handle_payload(&body)
        .await
        .map(Json)
        .map_err(trigger_error)
}

/// Start a fresh execution lineage for an object.
pub async fn retrigger(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RetriggerBody>,
) -> Result<(StatusCode, Json<RecordResult>), ApiError> {
    let result = state
        .trigger()
        .retrigger(&body.bucket, &body.key)
        .await
        .map_err(trigger_error)?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

fn trigger_error(e: TriggerError) -> ApiError {
    match &e {
        TriggerError::InvalidNotification(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        TriggerError::InvalidKey(_) => {
            api_error_with_code(StatusCode::BAD_REQUEST, e.to_string(), "InvalidObjectKey")
        }
        TriggerError::Status(inner) => {
            warn!("Ingest aborted by status store error: {}", inner);
            api_error_with_code(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), inner.code())
        }
        TriggerError::StartFailed { .. } => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
