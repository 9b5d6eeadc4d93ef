//! Ingest token and metrics middleware for API routes.

use std::sync::Arc;
use std::time::Instant;

use assetflow_core::secrets::constant_time_eq;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
    INGEST_AUTH_FAILURES,
};
use crate::state::AppState;

/// Header carrying the ingest token.
pub const INGEST_TOKEN_HEADER: &str = "x-ingest-token";

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Require the ingest token on ingest routes when one is configured.
///
/// Without a configured token every request passes.
pub async fn ingest_token_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.ingest_token() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(INGEST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            INGEST_AUTH_FAILURES
                .with_label_values(&["invalid_token"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            INGEST_AUTH_FAILURES
                .with_label_values(&["missing_token"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
