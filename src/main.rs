use anyhow::Context;
use podprobe::clock::SystemClock;
use podprobe::config::{read_namespace, resolve_hostname, BuildInfo, Config};
use podprobe::discovery::{
    headless_domain, Discovery, DnsSrvResolver, FanOutOptions, HttpPeerClient,
};
use podprobe::server::{
    create_metrics, run_server, shutdown_channel, wait_for_signal, AppState, ServiceInfo,
    ShutdownReason,
};
use podprobe::storage::MarkerStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Build the discovery client from configuration
///
/// A missing namespace leaves discovery disabled.
fn build_discovery(config: &Config, namespace: Option<&str>) -> Discovery {
    let domain = namespace.map(|ns| headless_domain(&config.service_name, ns, &config.cluster_domain));
    if let Some(domain) = &domain {
        info!(domain = %domain, "Peer discovery enabled");
    }

    Discovery::new(
        domain,
        config.dns_timeout,
        Arc::new(DnsSrvResolver::from_system_conf(config.dns_timeout)),
        Arc::new(HttpPeerClient::new(config.peer_timeout)),
        FanOutOptions {
            timeout: config.peer_timeout,
            max_in_flight: config.peer_max_in_flight,
        },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let hostname = resolve_hostname();
    let build = BuildInfo::load(&config.build_file);
    let namespace = read_namespace(&config.namespace_file);
    info!(
        hostname = %hostname,
        version = %build.version,
        namespace = namespace.as_deref().unwrap_or("<none>"),
        "Starting podprobe"
    );

    let store = match &config.storage_path {
        Some(path) => {
            info!(path = %path.display(), "Sync check storage configured");
            Some(MarkerStore::new(path))
        }
        None => {
            info!("Storage path not configured - sync check disabled");
            None
        }
    };

    let metrics = create_metrics()?;
    let discovery = build_discovery(&config, namespace.as_deref());
    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    let state = AppState::new(
        ServiceInfo::new(hostname, namespace, build),
        discovery,
        store,
        Arc::new(SystemClock),
        metrics,
        shutdown_controller,
    );

    let server_state = state.clone();
    let server_signal = shutdown_signal.clone();
    let addr = config.bind_addr();
    let mut server = tokio::spawn(async move { run_server(addr, server_state, server_signal).await });

    // Run until a termination signal arrives, /kill is called, or the server dies
    let mut kill_signal = shutdown_signal.clone();
    tokio::select! {
        signal = wait_for_signal() => {
            let signal = signal.context("failed to register signal handlers")?;
            state.begin_shutdown(ShutdownReason::Signal(signal));
        }
        reason = kill_signal.wait() => {
            info!(reason = ?reason, "Shutdown requested");
        }
        result = &mut server => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "HTTP server failed");
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server stopped with error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    info!("podprobe shut down gracefully");
    Ok(())
}
