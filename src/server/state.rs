//! Process-wide state shared by all handlers

use super::health::HealthState;
use super::metrics::SharedMetrics;
use super::shutdown::{ShutdownController, ShutdownReason};
use crate::clock::Clock;
use crate::config::BuildInfo;
use crate::discovery::Discovery;
use crate::storage::MarkerStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Static facts about this instance
#[derive(Debug)]
pub struct ServiceInfo {
    pub hostname: String,
    /// `None` outside a cluster
    pub namespace: Option<String>,
    pub build: BuildInfo,
    pub started: Instant,
}

impl ServiceInfo {
    pub fn new(hostname: String, namespace: Option<String>, build: BuildInfo) -> Self {
        Self {
            hostname,
            namespace,
            build,
            started: Instant::now(),
        }
    }

    /// Seconds since startup
    pub fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Count of status calls, shared across clones
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicU64>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call unless `ignore` is set; returns the current total
    pub fn record(&self, ignore: bool) -> u64 {
        if ignore {
            self.get()
        } else {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    pub fn get(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Handler state; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub info: Arc<ServiceInfo>,
    pub calls: CallCounter,
    pub health: HealthState,
    pub discovery: Arc<Discovery>,
    /// Marker storage; `None` disables `/sync-test`
    pub store: Option<Arc<MarkerStore>>,
    pub clock: Arc<dyn Clock>,
    pub metrics: SharedMetrics,
    pub shutdown: Arc<ShutdownController>,
}

impl AppState {
    pub fn new(
        info: ServiceInfo,
        discovery: Discovery,
        store: Option<MarkerStore>,
        clock: Arc<dyn Clock>,
        metrics: SharedMetrics,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            info: Arc::new(info),
            calls: CallCounter::new(),
            health: HealthState::new(),
            discovery: Arc::new(discovery),
            store: store.map(Arc::new),
            clock,
            metrics,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Drop readiness so traffic drains, then trigger shutdown
    pub fn begin_shutdown(&self, reason: ShutdownReason) {
        self.health.set_not_ready();
        self.shutdown.shutdown(reason);
    }
}
