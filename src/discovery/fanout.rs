//! Concurrent peer fan-out
//!
//! Every peer is queried at once (optionally capped), each call is bounded by
//! the per-call timeout, and the aggregate is returned once the slowest call
//! has finished or timed out. A failing peer never fails the fan-out: it is
//! recorded in `FanOut::failures` and simply contributes no report.

use super::PeerEndpoint;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Peer self-status path; `ignore` keeps the call out of the peer's counter
pub const PEER_STATUS_PATH: &str = "/me?ignore";

/// A peer's self-report, kept as an opaque JSON object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerReport(Map<String, Value>);

impl PeerReport {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.0.get("hostname").and_then(Value::as_str)
    }

    /// Last marker line the peer has in its storage
    pub fn last_line(&self) -> Option<&str> {
        self.0.get("last_line").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl TryFrom<Value> for PeerReport {
    type Error = PeerFailureKind;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(PeerReport(fields)),
            other => Err(PeerFailureKind::MalformedBody(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Why a single peer produced no report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeerFailureKind {
    #[error("connection timed out")]
    ConnectTimeout,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl PeerFailureKind {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            PeerFailureKind::ConnectTimeout => "connect_timeout",
            PeerFailureKind::Timeout(_) => "timeout",
            PeerFailureKind::Connect(_) => "connect",
            PeerFailureKind::Status(_) => "status",
            PeerFailureKind::MalformedBody(_) => "malformed_body",
            PeerFailureKind::Other(_) => "other",
        }
    }
}

/// Trait for querying one peer
///
/// Production code uses `HttpPeerClient`.
/// Tests use `MockPeerSource` with scripted per-host behavior.
#[async_trait]
pub trait PeerStatusSource: Send + Sync {
    async fn fetch(&self, endpoint: &PeerEndpoint, path: &str)
        -> Result<PeerReport, PeerFailureKind>;
}

/// Queries peers over plain HTTP
///
/// The connect phase gets a smaller budget than the whole call so a peer that
/// never completes the handshake is reported as `ConnectTimeout` rather than
/// as a generic timeout.
pub struct HttpPeerClient {
    client: reqwest::Client,
    timeout: Duration,
}

/// Share of the per-call timeout allowed for establishing the connection
fn connect_budget(timeout: Duration) -> Duration {
    timeout * 3 / 4
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_budget(timeout))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to build peer HTTP client, using default");
                reqwest::Client::new()
            }
        };
        Self { client, timeout }
    }
}

#[async_trait]
impl PeerStatusSource for HttpPeerClient {
    async fn fetch(
        &self,
        endpoint: &PeerEndpoint,
        path: &str,
    ) -> Result<PeerReport, PeerFailureKind> {
        let response = self
            .client
            .get(endpoint.url(path))
            .send()
            .await
            .map_err(|e| classify_http_error(e, self.timeout))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PeerFailureKind::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_http_error(e, self.timeout))?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| PeerFailureKind::MalformedBody(e.to_string()))?;
        PeerReport::try_from(value)
    }
}

fn classify_http_error(error: reqwest::Error, timeout: Duration) -> PeerFailureKind {
    if error.is_connect() && error.is_timeout() {
        PeerFailureKind::ConnectTimeout
    } else if error.is_timeout() {
        PeerFailureKind::Timeout(timeout)
    } else if error.is_connect() {
        PeerFailureKind::Connect(error.to_string())
    } else if error.is_decode() || error.is_body() {
        PeerFailureKind::MalformedBody(error.to_string())
    } else {
        PeerFailureKind::Other(error.to_string())
    }
}

/// Fan-out tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanOutOptions {
    /// Bound on each individual peer call
    pub timeout: Duration,
    /// Maximum concurrent calls; `None` dispatches every peer at once
    pub max_in_flight: Option<usize>,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            timeout: crate::config::DEFAULT_PEER_TIMEOUT,
            max_in_flight: None,
        }
    }
}

/// A peer that answered
#[derive(Debug, Clone, PartialEq)]
pub struct PeerResponse {
    pub endpoint: PeerEndpoint,
    pub report: PeerReport,
}

/// A peer that did not
#[derive(Debug, Clone, PartialEq)]
pub struct PeerFailure {
    pub endpoint: PeerEndpoint,
    pub kind: PeerFailureKind,
}

/// Aggregate of one fan-out, in completion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOut {
    pub responses: Vec<PeerResponse>,
    pub failures: Vec<PeerFailure>,
}

impl FanOut {
    pub fn reports(&self) -> impl Iterator<Item = &PeerReport> {
        self.responses.iter().map(|r| &r.report)
    }

    pub fn into_reports(self) -> Vec<PeerReport> {
        self.responses.into_iter().map(|r| r.report).collect()
    }

    /// True if any peer could not be connected to within the timeout
    pub fn has_connect_timeout(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == PeerFailureKind::ConnectTimeout)
    }
}

/// Query every endpoint concurrently and aggregate the successful reports
pub async fn query_peers(
    source: &dyn PeerStatusSource,
    endpoints: &[PeerEndpoint],
    path: &str,
    options: &FanOutOptions,
) -> FanOut {
    let mut fan_out = FanOut::default();
    if endpoints.is_empty() {
        return fan_out;
    }

    let width = options.max_in_flight.unwrap_or(endpoints.len()).max(1);
    let timeout = options.timeout;

    let mut outcomes = stream::iter(endpoints.iter().cloned())
        .map(|endpoint| async move {
            let outcome = match tokio::time::timeout(timeout, source.fetch(&endpoint, path)).await
            {
                Ok(result) => result,
                Err(_) => Err(PeerFailureKind::Timeout(timeout)),
            };
            (endpoint, outcome)
        })
        .buffer_unordered(width);

    while let Some((endpoint, outcome)) = outcomes.next().await {
        match outcome {
            Ok(report) => {
                debug!(peer = %endpoint, "Peer answered");
                fan_out.responses.push(PeerResponse { endpoint, report });
            }
            Err(kind) => {
                warn!(peer = %endpoint, error = %kind, "Peer query failed");
                fan_out.failures.push(PeerFailure { endpoint, kind });
            }
        }
    }

    debug!(
        answered = fan_out.responses.len(),
        failed = fan_out.failures.len(),
        "Peer fan-out complete"
    );
    fan_out
}

/// Scripted behavior of one mock peer
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockPeer {
    /// Answer with the report after the delay
    Respond(PeerReport, Duration),
    /// Fail immediately
    Fail(PeerFailureKind),
    /// Never answer
    Hang,
}

/// Peer source with scripted per-host behavior
#[cfg(test)]
#[derive(Default)]
pub struct MockPeerSource {
    peers: std::collections::HashMap<String, MockPeer>,
    calls: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockPeerSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, host: &str, behavior: MockPeer) -> Self {
        self.peers.insert(host.to_string(), behavior);
        self
    }

    /// (host, path) of every fetch, in call order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl PeerStatusSource for MockPeerSource {
    async fn fetch(
        &self,
        endpoint: &PeerEndpoint,
        path: &str,
    ) -> Result<PeerReport, PeerFailureKind> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.host.clone(), path.to_string()));

        match self.peers.get(&endpoint.host) {
            Some(MockPeer::Respond(report, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(report.clone())
            }
            Some(MockPeer::Fail(kind)) => Err(kind.clone()),
            Some(MockPeer::Hang) => futures::future::pending().await,
            None => Err(PeerFailureKind::Connect("connection refused".to_string())),
        }
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;
