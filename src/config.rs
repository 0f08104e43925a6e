//! Runtime configuration
//!
//! Everything is read from environment variables once at startup. Files the
//! platform may or may not mount (service-account namespace, build info)
//! degrade to defaults instead of failing startup.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Namespace file mounted into every pod with a service account
pub const DEFAULT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Build info written by the image build (version line, date line)
pub const DEFAULT_BUILD_FILE: &str = "/app/BUILD";

/// Version reported when no build file is present
pub const DEV_VERSION: &str = "Dev (Runtime)";

/// Default SRV resolution deadline
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_millis(500);

/// Default per-peer HTTP call timeout
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} is not a valid {expected}: {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Service name; the headless service is `<service_name>-headless`
    pub service_name: String,
    pub cluster_domain: String,
    pub namespace_file: PathBuf,
    pub build_file: PathBuf,
    /// Marker file for `/sync-test`; `None` disables the check
    pub storage_path: Option<PathBuf>,
    pub dns_timeout: Duration,
    pub peer_timeout: Duration,
    /// Cap on concurrent peer calls; `None` queries every peer at once
    pub peer_max_in_flight: Option<usize>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = match var("HOST") {
            Some(v) => parse(&v, "HOST", "IP address")?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match var("PORT") {
            Some(v) => parse(&v, "PORT", "port number")?,
            None => 8080,
        };
        let dns_timeout = match var("DNS_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse(&v, "DNS_TIMEOUT_MS", "millisecond count")?),
            None => DEFAULT_DNS_TIMEOUT,
        };
        let peer_timeout = match var("PEER_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse(&v, "PEER_TIMEOUT_MS", "millisecond count")?),
            None => DEFAULT_PEER_TIMEOUT,
        };
        let peer_max_in_flight = match var("PEER_MAX_IN_FLIGHT") {
            Some(v) => {
                let cap: usize = parse(&v, "PEER_MAX_IN_FLIGHT", "positive integer")?;
                if cap == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: "PEER_MAX_IN_FLIGHT",
                        expected: "positive integer",
                        value: v,
                    });
                }
                Some(cap)
            }
            None => None,
        };

        Ok(Config {
            host,
            port,
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "demo".to_string()),
            cluster_domain: var("CLUSTER_DOMAIN").unwrap_or_else(|| "cluster.local".to_string()),
            namespace_file: var("NAMESPACE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NAMESPACE_FILE)),
            build_file: var("BUILD_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_FILE)),
            storage_path: var("STORAGE_PATH").map(PathBuf::from),
            dns_timeout,
            peer_timeout,
            peer_max_in_flight,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    name: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        expected,
        value: value.to_string(),
    })
}

/// Version and build date baked into the image
#[derive(Debug, Clone, PartialEq)]
pub struct BuildInfo {
    pub version: String,
    pub date: String,
}

impl BuildInfo {
    /// Read the build file: first line is the version, second the date
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let mut lines = contents.lines();
                BuildInfo {
                    version: lines.next().unwrap_or_default().trim().to_string(),
                    date: lines.next().unwrap_or_default().trim().to_string(),
                }
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to read build file");
                }
                BuildInfo::dev()
            }
        }
    }

    pub fn dev() -> Self {
        BuildInfo {
            version: DEV_VERSION.to_string(),
            date: String::new(),
        }
    }
}

/// Read the pod namespace, or `None` when not running in a cluster
pub fn read_namespace(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) if !contents.trim().is_empty() => {
            let namespace = contents.trim().to_string();
            info!(namespace = %namespace, "Using Kubernetes namespace");
            Some(namespace)
        }
        Ok(_) | Err(_) => {
            info!(
                path = %path.display(),
                "No Kubernetes namespace found - disabling SRV record lookup"
            );
            None
        }
    }
}

/// Hostname of this instance (the pod name in Kubernetes)
pub fn resolve_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
