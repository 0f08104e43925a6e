//! Status, sync-check, kill and metrics handlers

use super::{AppState, ShutdownReason};
use crate::discovery::{DiscoveryError, PeerReport};
use crate::sync_check::{run_sync_check, SyncCheckError};
use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Query parameter that keeps a call out of the counter
const IGNORE_PARAM: &str = "ignore";

type Params = Query<HashMap<String, String>>;

/// `GET /me` body
#[derive(Debug, Serialize)]
pub struct SelfReport {
    pub hostname: String,
    pub calls: u64,
    pub version: String,
    pub uptime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildSection {
    pub version: String,
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct StatusSection {
    pub alive: bool,
    pub ready: bool,
}

/// Discovery errors by category
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ErrorSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

impl ErrorSection {
    fn from_discovery(error: &DiscoveryError) -> Self {
        match error {
            DiscoveryError::NoRecords | DiscoveryError::Timeout => ErrorSection {
                dns: Some(error.to_string()),
                ..Default::default()
            },
            DiscoveryError::Other(description) => ErrorSection {
                other: Some(format!("[dns] {}", description)),
                ..Default::default()
            },
        }
    }
}

/// `GET /` body
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub hostname: String,
    pub calls: u64,
    pub namespace: Option<String>,
    pub build: BuildSection,
    pub status: StatusSection,
    pub error: ErrorSection,
    /// Omitted when discovery failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<PeerReport>>,
}

/// Own self-report, also served to peers during discovery
pub(super) async fn me(State(state): State<AppState>, Query(params): Params) -> Json<SelfReport> {
    let calls = state.calls.record(params.contains_key(IGNORE_PARAM));

    let last_line = match &state.store {
        Some(store) => match store.last_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read marker storage");
                None
            }
        },
        None => None,
    };

    Json(SelfReport {
        hostname: state.info.hostname.clone(),
        calls,
        version: state.info.build.version.clone(),
        uptime: state.info.uptime(),
        last_line,
    })
}

/// Full status including discovered peers
pub(super) async fn status(
    State(state): State<AppState>,
    Query(params): Params,
) -> Json<StatusReport> {
    let calls = state.calls.record(params.contains_key(IGNORE_PARAM));

    let result = state.discovery.discover().await;
    if state.discovery.is_enabled() {
        state.metrics.record_discovery(&result);
    }

    let (error, nodes) = match result {
        Ok(fan_out) => {
            let mut error = ErrorSection::default();
            if fan_out.has_connect_timeout() {
                error.req = Some("Connection Timeout".to_string());
            }
            (error, Some(fan_out.into_reports()))
        }
        Err(e) => {
            warn!(error = %e, "Peer discovery failed");
            (ErrorSection::from_discovery(&e), None)
        }
    };

    Json(StatusReport {
        hostname: state.info.hostname.clone(),
        calls,
        namespace: state.info.namespace.clone(),
        build: BuildSection {
            version: state.info.build.version.clone(),
            date: state.info.build.date.clone(),
        },
        status: StatusSection {
            alive: state.health.is_alive(),
            ready: state.health.is_ready(),
        },
        error,
        nodes,
    })
}

/// Write a marker and compare it with every peer's last marker
pub(super) async fn sync_test(State(state): State<AppState>) -> Response {
    let enabled = state.discovery.is_enabled();
    let result = run_sync_check(
        state.store.as_deref(),
        state.clock.as_ref(),
        &state.discovery,
        |discovered| {
            if enabled {
                state.metrics.record_discovery(discovered);
            }
        },
    )
    .await;

    match result {
        Ok(report) => {
            state.metrics.record_sync_check(report.response_time);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => {
            let status = match &e {
                SyncCheckError::StorageNotConfigured | SyncCheckError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                SyncCheckError::Discovery(_) => StatusCode::BAD_GATEWAY,
            };
            error!(error = %e, "Sync check failed");
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// Stop the process gracefully
pub(super) async fn kill(State(state): State<AppState>) -> Json<serde_json::Value> {
    info!("Kill requested");
    state.begin_shutdown(ShutdownReason::Kill);
    Json(json!({ "hostname": state.info.hostname, "status": "Killing..." }))
}

/// Prometheus metrics handler
pub(super) async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}
