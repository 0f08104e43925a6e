//! Graceful shutdown handling
//!
//! Shutdown is triggered by SIGTERM/SIGINT or by the `/kill` endpoint. Both
//! paths go through `ShutdownController`, and the HTTP server drains
//! in-flight requests once the `ShutdownSignal` fires. The first trigger wins;
//! its reason is what every waiter sees.

use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// What started the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Termination signal, by name
    Signal(&'static str),
    /// `/kill` was called
    Kill,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "{name}"),
            ShutdownReason::Kill => f.write_str("/kill"),
        }
    }
}

/// Receiving side of the shutdown channel
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered
    ///
    /// Returns `None` if the controller was dropped without triggering.
    pub async fn wait(&mut self) -> Option<ShutdownReason> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.receiver.borrow()
    }
}

/// Sending side of the shutdown channel
pub struct ShutdownController {
    sender: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownController {
    /// Trigger shutdown; returns false if it was already triggered
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(reason = %reason, "Shutdown triggered");
        }
        first
    }
}

pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(None);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT and return its name
///
/// Fails if the handlers cannot be registered.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "CTRL_C", "Received termination signal");
    Ok("CTRL_C")
}
