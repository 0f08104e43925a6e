//! Shared helpers for server tests

use super::*;
use crate::clock::MockClock;
use crate::config::BuildInfo;
use crate::discovery::{
    headless_domain, Discovery, FanOutOptions, MockPeerSource, SrvResolver, StaticResolver,
};
use crate::storage::MarkerStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const TEST_HOSTNAME: &str = "pod-self";

/// A server running on an ephemeral port
pub struct TestServer {
    pub base: String,
    pub state: AppState,
    pub shutdown: ShutdownSignal,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .expect("Failed to connect to test server")
    }

    pub async fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let response = self.get(path).await;
        let status = response.status().as_u16();
        let body = response.json().await.expect("JSON body");
        (status, body)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn disabled_discovery() -> Discovery {
    Discovery::disabled(
        Arc::new(StaticResolver::new(vec![])),
        Arc::new(MockPeerSource::new()),
    )
}

pub fn discovery(resolver: Arc<dyn SrvResolver>, peers: MockPeerSource) -> Discovery {
    Discovery::new(
        Some(headless_domain("demo", "default", "cluster.local")),
        Duration::from_millis(500),
        resolver,
        Arc::new(peers),
        FanOutOptions {
            timeout: Duration::from_millis(200),
            max_in_flight: None,
        },
    )
}

/// Start a server with the given discovery and storage, clock pinned at t=100s
pub async fn spawn_server(discovery: Discovery, store: Option<MarkerStore>) -> TestServer {
    let (controller, signal) = shutdown_channel();
    let namespace = discovery.is_enabled().then(|| "default".to_string());
    let state = AppState::new(
        ServiceInfo::new(
            TEST_HOSTNAME.to_string(),
            namespace,
            BuildInfo {
                version: "v1.2.3".to_string(),
                date: "2024-05-01".to_string(),
            },
        ),
        discovery,
        store,
        Arc::new(MockClock::at_epoch_seconds(100)),
        create_metrics().expect("metrics registry"),
        controller,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();

    let handle = tokio::spawn(serve(listener, state.clone(), signal.clone()));

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        state,
        shutdown: signal,
        handle,
        client: reqwest::Client::new(),
    }
}
