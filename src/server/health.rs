//! Liveness and readiness for Kubernetes probes
//!
//! - `/healthz/alive` - Liveness: 200 while alive, 503 once marked dead
//! - `/healthz/ready` - Readiness: 200 while ready, 503 otherwise
//! - `/alive`, `/ready` - Toggle the flags to simulate failures

use super::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared liveness/readiness flags
///
/// Both start true. Clones share the same flags.
#[derive(Debug, Clone)]
pub struct HealthState {
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Mark not ready (e.g., during shutdown)
    ///
    /// This causes the readiness probe to return 503, signaling to
    /// Kubernetes that the pod should no longer receive traffic.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Flip readiness, returning the new value
    pub fn toggle_ready(&self) -> bool {
        !self.ready.fetch_xor(true, Ordering::SeqCst)
    }

    /// Flip liveness and make readiness follow it, returning the new value
    pub fn toggle_alive(&self) -> bool {
        let alive = !self.alive.fetch_xor(true, Ordering::SeqCst);
        self.ready.store(alive, Ordering::SeqCst);
        alive
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

fn probe(hostname: &str, ok: bool, up: &str, down: &str) -> (StatusCode, Json<Value>) {
    let (status, label) = if ok {
        (StatusCode::OK, up)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, down)
    };
    (status, Json(json!({ "hostname": hostname, "status": label })))
}

/// Readiness probe handler
pub(super) async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    probe(&state.info.hostname, state.health.is_ready(), "Ready", "Not Ready")
}

/// Liveness probe handler
pub(super) async fn liveness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    probe(&state.info.hostname, state.health.is_alive(), "Alive", "Dead")
}

pub(super) async fn toggle_ready(State(state): State<AppState>) -> Json<Value> {
    let label = if state.health.toggle_ready() {
        "Ready"
    } else {
        "Not Ready"
    };
    Json(json!({ "hostname": state.info.hostname, "New Status": label }))
}

pub(super) async fn toggle_alive(State(state): State<AppState>) -> Json<Value> {
    let label = if state.health.toggle_alive() {
        "Healthy"
    } else {
        "Unhealthy"
    };
    Json(json!({ "hostname": state.info.hostname, "New Status": label }))
}
