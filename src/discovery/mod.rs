//! Peer discovery through a headless service
//!
//! Discovery is two steps:
//! 1. Resolve the headless service's SRV records into peer endpoints (`srv`)
//! 2. Ask every peer for its self-report concurrently (`fanout`)
//!
//! When the pod namespace is unknown (not running in a cluster) discovery is
//! disabled and yields an empty result without touching the network.

mod fanout;
mod srv;

pub use fanout::{
    query_peers, FanOut, FanOutOptions, HttpPeerClient, PeerFailure, PeerFailureKind,
    PeerReport, PeerResponse, PeerStatusSource, PEER_STATUS_PATH,
};
pub use srv::{DnsSrvResolver, SrvResolver};

#[cfg(test)]
pub use fanout::{MockPeer, MockPeerSource};
#[cfg(test)]
pub use srv::StaticResolver;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// A peer address taken from one SRV record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Plain-HTTP URL for `path` on this peer
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// SRV resolution failures, kept distinct for error reporting
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiscoveryError {
    #[error("No SRV records found")]
    NoRecords,

    #[error("DNS Timeout")]
    Timeout,

    #[error("DNS lookup failed: {0}")]
    Other(String),
}

/// SRV name of the headless service fronting this deployment
pub fn headless_domain(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("http.tcp.{service}-headless.{namespace}.svc.{cluster_domain}")
}

/// Resolves peers and queries them
pub struct Discovery {
    domain: Option<String>,
    dns_timeout: Duration,
    resolver: Arc<dyn SrvResolver>,
    peers: Arc<dyn PeerStatusSource>,
    fan_out: FanOutOptions,
}

impl Discovery {
    /// Create a discovery client
    ///
    /// `domain` is `None` when the namespace is unknown, which disables discovery.
    pub fn new(
        domain: Option<String>,
        dns_timeout: Duration,
        resolver: Arc<dyn SrvResolver>,
        peers: Arc<dyn PeerStatusSource>,
        fan_out: FanOutOptions,
    ) -> Self {
        Self {
            domain,
            dns_timeout,
            resolver,
            peers,
            fan_out,
        }
    }

    /// Discovery client that never resolves anything
    pub fn disabled(resolver: Arc<dyn SrvResolver>, peers: Arc<dyn PeerStatusSource>) -> Self {
        Self::new(None, Duration::ZERO, resolver, peers, FanOutOptions::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.domain.is_some()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Resolve the peer set without querying it
    pub async fn resolve(&self) -> Result<Vec<PeerEndpoint>, DiscoveryError> {
        let Some(domain) = &self.domain else {
            debug!("Discovery disabled, skipping SRV lookup");
            return Ok(Vec::new());
        };

        let endpoints = self.resolver.resolve(domain, self.dns_timeout).await?;
        for endpoint in &endpoints {
            info!(peer = %endpoint, "Found SRV record");
        }
        Ok(endpoints)
    }

    /// Resolve peers and collect their self-reports
    ///
    /// Fails only when resolution fails. Individual peers that cannot be
    /// queried end up in `FanOut::failures`.
    pub async fn discover(&self) -> Result<FanOut, DiscoveryError> {
        let endpoints = self.resolve().await?;
        Ok(query_peers(self.peers.as_ref(), &endpoints, PEER_STATUS_PATH, &self.fan_out).await)
    }
}

#[cfg(test)]
#[path = "discovery_test.rs"]
mod tests;
