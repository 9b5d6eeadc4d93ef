//! Workflow execution API handlers.

use std::sync::Arc;

use assetflow_core::{ExecutionFilter, ExecutionState, WorkflowError, WorkflowExecution};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for execution queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for execution queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing executions
#[derive(Debug, Deserialize)]
pub struct ListExecutionsParams {
    /// Filter by state (e.g. `FAILED`)
    pub state: Option<String>,
    /// Filter by asset id
    pub asset_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<WorkflowExecution>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List executions, newest first
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListExecutionsParams>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ExecutionFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref raw) = params.state {
        let execution_state: ExecutionState = raw
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_state(execution_state);
    }

    if let Some(ref asset_id) = params.asset_id {
        filter = filter.with_asset_id(asset_id);
    }

    let executions = state
        .engine()
        .list_executions(&filter)
        .map_err(internal_error)?;

    // Count ignores limit/offset
    let total = state
        .engine()
        .count_executions(&filter)
        .map_err(internal_error)?;

    Ok(Json(ListExecutionsResponse {
        executions,
        total,
        limit,
        offset,
    }))
}

/// Get one execution by id
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    match state.engine().get_execution(&id) {
        Ok(execution) => Ok(Json(execution)),
        Err(WorkflowError::ExecutionNotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Execution not found: {}", id),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

fn internal_error(e: WorkflowError) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
