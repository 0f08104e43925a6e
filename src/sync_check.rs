//! Cross-pod synchronization check
//!
//! Writes a timestamped marker to local storage, then asks every peer for the
//! last marker it holds. A peer is "In sync" when that line is exactly the
//! marker just written. Single pass, no retries.

use crate::clock::{epoch_seconds, Clock};
use crate::discovery::{Discovery, DiscoveryError, FanOut, PeerReport};
use crate::storage::{MarkerStore, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SyncCheckError {
    #[error("Storage path not configured")]
    StorageNotConfigured,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// How a peer's last marker compares to ours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    #[serde(rename = "In sync")]
    InSync,
    #[serde(rename = "Out of sync")]
    OutOfSync,
    #[serde(rename = "No data")]
    NoData,
}

/// Report key for the elapsed time; a peer may not use it as its hostname
pub const RESPONSE_TIME_KEY: &str = "response_time";

/// Result of one check: status per peer hostname plus elapsed seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub peers: BTreeMap<String, SyncStatus>,
    pub response_time: f64,
}

/// Marker line for a request at `request_time` epoch seconds
///
/// Debug formatting keeps the fractional part on whole seconds ("100.0").
pub fn marker_line(request_time: f64) -> String {
    format!("Request at {:?}", request_time)
}

/// Compare a peer's last line against the expected marker, verbatim
pub fn classify(report: &PeerReport, expected: &str) -> SyncStatus {
    match report.last_line() {
        None => SyncStatus::NoData,
        Some(line) if line == expected => SyncStatus::InSync,
        Some(_) => SyncStatus::OutOfSync,
    }
}

/// Run the write-then-poll check
///
/// `observe` sees the discovery result before it is turned into a report.
pub async fn run_sync_check<F>(
    store: Option<&MarkerStore>,
    clock: &dyn Clock,
    discovery: &Discovery,
    observe: F,
) -> Result<SyncReport, SyncCheckError>
where
    F: FnOnce(&Result<FanOut, DiscoveryError>),
{
    let store = store.ok_or(SyncCheckError::StorageNotConfigured)?;

    let marker = marker_line(epoch_seconds(clock.now()));
    let started = Instant::now();

    store.append(&marker).await?;
    let result = discovery.discover().await;
    observe(&result);
    let fan_out = result?;

    let mut peers = BTreeMap::new();
    for response in &fan_out.responses {
        let hostname = response
            .report
            .hostname()
            .unwrap_or(response.endpoint.host.as_str());
        if hostname == RESPONSE_TIME_KEY {
            warn!(peer = %response.endpoint, "Peer hostname collides with report key, skipping");
            continue;
        }
        peers.insert(hostname.to_string(), classify(&response.report, &marker));
    }

    let response_time = started.elapsed().as_secs_f64();
    info!(
        marker = %marker,
        peers = peers.len(),
        unreachable = fan_out.failures.len(),
        response_time,
        "Sync check complete"
    );

    Ok(SyncReport {
        peers,
        response_time,
    })
}

#[cfg(test)]
#[path = "sync_check_test.rs"]
mod tests;
