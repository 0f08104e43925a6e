//! Prometheus metrics
//!
//! Metrics exported at `/metrics`:
//! - `podprobe_http_requests_total{route}` - Requests served, by matched route
//! - `podprobe_srv_lookups_total{outcome}` - SRV resolutions (ok, no_records, timeout, error)
//! - `podprobe_peer_queries_total{outcome}` - Peer status calls (ok or failure kind)
//! - `podprobe_sync_check_duration_seconds` - Sync check response time

use crate::discovery::{DiscoveryError, FanOut};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<AppMetrics>;

/// Metric handles and the registry that owns them
pub struct AppMetrics {
    registry: Registry,
    http_requests: IntCounterVec,
    srv_lookups: IntCounterVec,
    peer_queries: IntCounterVec,
    sync_check_duration: Histogram,
}

/// Create and register all metrics in a fresh registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let http_requests = IntCounterVec::new(
        Opts::new("podprobe_http_requests_total", "HTTP requests served"),
        &["route"],
    )?;
    let srv_lookups = IntCounterVec::new(
        Opts::new("podprobe_srv_lookups_total", "SRV lookups by outcome"),
        &["outcome"],
    )?;
    let peer_queries = IntCounterVec::new(
        Opts::new("podprobe_peer_queries_total", "Peer status queries by outcome"),
        &["outcome"],
    )?;
    let sync_check_duration = Histogram::with_opts(
        HistogramOpts::new(
            "podprobe_sync_check_duration_seconds",
            "Time to write the marker and poll all peers",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )?;

    registry.register(Box::new(http_requests.clone()))?;
    registry.register(Box::new(srv_lookups.clone()))?;
    registry.register(Box::new(peer_queries.clone()))?;
    registry.register(Box::new(sync_check_duration.clone()))?;

    Ok(Arc::new(AppMetrics {
        registry,
        http_requests,
        srv_lookups,
        peer_queries,
        sync_check_duration,
    }))
}

impl AppMetrics {
    pub fn record_request(&self, route: &str) {
        self.http_requests.with_label_values(&[route]).inc();
    }

    /// Record the outcome of one enabled discovery pass
    pub fn record_discovery(&self, result: &Result<FanOut, DiscoveryError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(DiscoveryError::NoRecords) => "no_records",
            Err(DiscoveryError::Timeout) => "timeout",
            Err(DiscoveryError::Other(_)) => "error",
        };
        self.srv_lookups.with_label_values(&[outcome]).inc();

        if let Ok(fan_out) = result {
            self.record_fan_out(fan_out);
        }
    }

    pub fn record_fan_out(&self, fan_out: &FanOut) {
        if !fan_out.responses.is_empty() {
            self.peer_queries
                .with_label_values(&["ok"])
                .inc_by(fan_out.responses.len() as u64);
        }
        for failure in &fan_out.failures {
            self.peer_queries
                .with_label_values(&[failure.kind.label()])
                .inc();
        }
    }

    pub fn record_sync_check(&self, seconds: f64) {
        self.sync_check_duration.observe(seconds);
    }

    /// Render all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
