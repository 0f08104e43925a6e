//! HTTP server
//!
//! Routes:
//! - `/` - Full status with discovered peers
//! - `/me` - Self-report (`?ignore` skips the call counter)
//! - `/sync-test` - Cross-pod marker check
//! - `/healthz/ready`, `/healthz/alive` - Kubernetes probes
//! - `/ready`, `/alive` - Probe toggles
//! - `/kill` - Graceful self-termination
//! - `/metrics` - Prometheus metrics in text format

mod access_log;
mod handlers;
mod health;
mod metrics;
pub mod shutdown;
mod state;

pub use access_log::is_probe_path;
pub use handlers::{ErrorSection, SelfReport, StatusReport};
pub use health::HealthState;
pub use metrics::{create_metrics, AppMetrics, SharedMetrics};
pub use shutdown::{
    shutdown_channel, wait_for_signal, ShutdownController, ShutdownReason, ShutdownSignal,
};
pub use state::{AppState, CallCounter, ServiceInfo};

use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/me", get(handlers::me))
        .route("/sync-test", get(handlers::sync_test))
        .route("/healthz/ready", get(health::readiness))
        .route("/healthz/alive", get(health::liveness))
        .route("/ready", get(health::toggle_ready))
        .route("/alive", get(health::toggle_alive))
        .route("/kill", get(handlers::kill))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access_log::access_log,
        ))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` fires
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(addr = %addr, "HTTP server listening");

    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener, draining in-flight requests on shutdown
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            shutdown.wait().await;
        })
        .await
}

#[cfg(test)]
#[path = "test_support.rs"]
mod test_support;

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "handlers_test.rs"]
mod handlers_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
