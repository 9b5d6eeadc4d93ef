//! Asset status API handlers.

use std::sync::Arc;

use assetflow_core::{AssetRecord, AssetStatus, FeatureType, StatusError, StatusFilter};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListAssetsParams {
    /// Filter by status (e.g. `FAILED`)
    pub status: Option<String>,
    /// Filter by feature type (e.g. `image-meta`)
    pub feature_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListAssetsResponse {
    pub records: Vec<AssetRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Every feature record of one asset
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub asset_id: String,
    pub features: Vec<AssetRecord>,
}

/// List status records, most recently updated first
pub async fn list_assets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAssetsParams>,
) -> Result<Json<ListAssetsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = StatusFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref raw) = params.status {
        let status: AssetStatus = raw
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_status(status);
    }

    if let Some(ref raw) = params.feature_type {
        filter = filter.with_feature_type(parse_feature(raw)?);
    }

    let records = state.status_store().list(&filter).map_err(internal_error)?;
    let total = state.status_store().count(&filter).map_err(internal_error)?;

    Ok(Json(ListAssetsResponse {
        records,
        total,
        limit,
        offset,
    }))
}

/// Get all feature records of an asset
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<String>,
) -> Result<Json<AssetResponse>, ApiError> {
    let features = state
        .status_store()
        .list_for_asset(&asset_id)
        .map_err(internal_error)?;

    if features.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Asset not found: {}", asset_id),
        ));
    }

    Ok(Json(AssetResponse { asset_id, features }))
}

/// Get the status record of one `(asset_id, feature_type)` pair
pub async fn get_asset_feature(
    State(state): State<Arc<AppState>>,
    Path((asset_id, feature)): Path<(String, String)>,
) -> Result<Json<AssetRecord>, ApiError> {
    let feature_type = parse_feature(&feature)?;

    match state.status_store().get(&asset_id, feature_type) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No {} record for asset {}", feature_type, asset_id),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

fn parse_feature(raw: &str) -> Result<FeatureType, ApiError> {
    raw.parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))
}

fn internal_error(e: StatusError) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
