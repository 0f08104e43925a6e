//! podprobe: a small HTTP service for exercising Kubernetes probes,
//! SRV-based peer discovery and a cross-pod marker synchronization check.

pub mod clock;
pub mod config;
pub mod discovery;
pub mod server;
pub mod storage;
pub mod sync_check;
