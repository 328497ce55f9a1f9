//! GhostBridge Gateway
//!
//! Dual-transport edge gateway: terminates HTTP/2-over-TLS and QUIC client
//! traffic, demultiplexes requests into service channels, and embeds the ZNS
//! name-resolution subsystem.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gateway::config::Config;
use gateway::connections::ConnectionTable;
use gateway::{build_dispatcher, build_zns_service, http2, http3, metrics, telemetry};

/// Grace period for in-flight requests during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    telemetry::init_logging();

    // Pin the TLS crypto provider before any rustls config is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    // Load configuration first; startup failures exit non-zero
    let config = match Config::load_and_validate() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("FATAL: configuration invalid: {e}");
            std::process::exit(1);
        }
    };

    metrics::register_metrics();

    info!(
        http2_port = config.server.http2_port,
        http3_port = config.server.http3_port,
        channels = config.channels.len(),
        "configuration loaded"
    );

    // Shared outbound HTTP client (connection-pooled)
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_millis(config.service.request_timeout_ms))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("FATAL: cannot build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    // ZNS stack: resolvers -> cache/core -> metrics -> alerts -> facade
    let zns_service = match build_zns_service(&config, http.clone()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("FATAL: cannot initialise ZNS subsystem: {e}");
            std::process::exit(1);
        }
    };
    info!("ZNS subsystem initialised");

    let dispatcher = build_dispatcher(&config, Arc::clone(&zns_service), http);
    let connections = Arc::new(ConnectionTable::new(config.server.max_connections));

    let http2_addr: SocketAddr = match config.server.http2_addr() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("FATAL: invalid HTTP/2 bind address: {e}");
            std::process::exit(1);
        }
    };
    let http3_addr: SocketAddr = match config.server.http3_addr() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("FATAL: invalid HTTP/3 bind address: {e}");
            std::process::exit(1);
        }
    };

    // QUIC endpoint binds (and loads TLS) before any task starts; a failure
    // here must prevent startup entirely
    let max_streams = config
        .channels
        .iter()
        .map(|c| c.max_streams)
        .max()
        .unwrap_or(64);
    let cert_file = PathBuf::from(&config.server.cert_file);
    let key_file = PathBuf::from(&config.server.key_file);
    let endpoint = match http3::build_endpoint(http3_addr, &cert_file, &key_file, max_streams) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            eprintln!("FATAL: cannot start HTTP/3 listener: {e:#}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let http2_handle = Handle::new();

    // HTTP/3 accept loop
    let http3_task = tokio::spawn(http3::serve(
        endpoint,
        Arc::clone(&dispatcher),
        Arc::clone(&connections),
        shutdown.clone(),
    ));

    // HTTP/2 listener; its TLS load failure is also fatal
    let http2_task = {
        let dispatcher = Arc::clone(&dispatcher);
        let connections = Arc::clone(&connections);
        let handle = http2_handle.clone();
        tokio::spawn(async move {
            if let Err(e) = http2::serve(
                http2_addr,
                &cert_file,
                &key_file,
                dispatcher,
                connections,
                handle,
            )
            .await
            {
                error!(error = %e, "HTTP/2 listener failed");
                std::process::exit(1);
            }
        })
    };

    // Periodic maintenance: cache cleanup, rate-window reset, resource
    // sampling, alert evaluation
    let periodic_task = {
        let zns_service = Arc::clone(&zns_service);
        let shutdown = shutdown.clone();
        let interval = gateway::periodic_interval(&config);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => zns_service.run_periodic_tasks().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    };

    info!("GhostBridge gateway running; press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "signal handler failed; shutting down");
    }

    info!("shutdown requested; draining in-flight requests");
    shutdown.cancel();
    http2_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));

    let drain = async {
        let _ = http3_task.await;
        let _ = http2_task.await;
        let _ = periodic_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(2), drain)
        .await
        .is_err()
    {
        warn!("grace period elapsed; dropping remaining tasks");
    }

    info!("goodbye");
}
