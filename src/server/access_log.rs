//! Request logging middleware
//!
//! Logs one line per request and counts it in metrics. Probe traffic under
//! `/healthz/` is counted but not logged.

use super::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;

/// True for Kubernetes probe paths
pub fn is_probe_path(path: &str) -> bool {
    path.starts_with("/healthz/")
}

pub(super) async fn access_log(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    state.metrics.record_request(&route);
    if !is_probe_path(&path) {
        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request served"
        );
    }
    response
}
