//! DNS SRV resolution

use super::{DiscoveryError, PeerEndpoint};
use async_trait::async_trait;
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

/// Trait for SRV lookups
///
/// Production code uses `DnsSrvResolver`.
/// Tests use `StaticResolver` which returns a preconfigured answer.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Resolve `domain` into peer endpoints, giving up after `deadline`
    async fn resolve(
        &self,
        domain: &str,
        deadline: Duration,
    ) -> Result<Vec<PeerEndpoint>, DiscoveryError>;
}

/// SRV resolver backed by the system DNS configuration
///
/// Single attempt, no answer caching.
pub struct DnsSrvResolver {
    resolver: TokioAsyncResolver,
}

impl DnsSrvResolver {
    /// Build from `/etc/resolv.conf`, falling back to public defaults
    pub fn from_system_conf(deadline: Duration) -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "Failed to read system DNS configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = deadline;
        opts.attempts = 1;
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn resolve(
        &self,
        domain: &str,
        deadline: Duration,
    ) -> Result<Vec<PeerEndpoint>, DiscoveryError> {
        let lookup = match tokio::time::timeout(deadline, self.resolver.srv_lookup(domain)).await {
            Ok(result) => result.map_err(classify_resolve_error)?,
            Err(_) => {
                debug!(domain = %domain, ?deadline, "SRV lookup exceeded deadline");
                return Err(DiscoveryError::Timeout);
            }
        };

        let endpoints: Vec<PeerEndpoint> = lookup
            .iter()
            .map(|srv| {
                let target = srv.target().to_utf8();
                PeerEndpoint::new(target.trim_end_matches('.'), srv.port())
            })
            .collect();

        if endpoints.is_empty() {
            return Err(DiscoveryError::NoRecords);
        }
        Ok(endpoints)
    }
}

/// Map resolver errors onto the discovery taxonomy
pub(crate) fn classify_resolve_error(error: ResolveError) -> DiscoveryError {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DiscoveryError::NoRecords,
        ResolveErrorKind::Timeout => DiscoveryError::Timeout,
        _ => DiscoveryError::Other(error.to_string()),
    }
}

/// Resolver returning a fixed answer, counting calls
#[cfg(test)]
pub struct StaticResolver {
    answer: Result<Vec<PeerEndpoint>, DiscoveryError>,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl StaticResolver {
    pub fn new(endpoints: Vec<PeerEndpoint>) -> Self {
        Self {
            answer: Ok(endpoints),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn failing(error: DiscoveryError) -> Self {
        Self {
            answer: Err(error),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl SrvResolver for StaticResolver {
    async fn resolve(
        &self,
        _domain: &str,
        _deadline: Duration,
    ) -> Result<Vec<PeerEndpoint>, DiscoveryError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.answer.clone()
    }
}
