//! dGateway CLI
//!
//! Command-line entry point for the dGateway capture-and-replay proxy.
//! This binary runs the recording reverse proxy and the admin API side by
//! side, with a single background writer persisting captured exchanges.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use dgateway_core::{capture_channel, AppError, ExchangeStore, RecordingState};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod admin;
mod config;
mod http_proxy;
mod replay;

use admin::AdminState;
use config::{Args, ConfigError, GatewayConfig};
use http_proxy::ProxyState;
use replay::ReplayEngine;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open store: {0}")]
    Store(#[from] AppError),

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = GatewayConfig::try_from(args)?;

    // Migration failures stop startup here
    let (store, _report) = ExchangeStore::open(&config.db_path)?;

    let recording = RecordingState::new(config.record_on_start);
    let (queue, consumer) = capture_channel(config.queue_capacity);

    let (writer_stop_tx, writer_stop_rx) = broadcast::channel::<()>(1);
    let writer = tokio::spawn(consumer.run(store.clone(), writer_stop_rx));

    let proxy_state = ProxyState {
        target: config.target.clone(),
        client: http_proxy::build_proxy_client()?,
        recording: recording.clone(),
        queue: queue.clone(),
        max_body_bytes: config.max_body_bytes,
    };
    let admin_state = AdminState {
        store,
        recording: recording.clone(),
        queue,
        replay: ReplayEngine::new(config.target.clone(), config.replay_timeout),
    };

    let proxy_listener = TcpListener::bind(config.proxy_addr)
        .await
        .map_err(|e| StartupError::Bind(config.proxy_addr, e))?;
    let admin_listener = TcpListener::bind(config.admin_addr)
        .await
        .map_err(|e| StartupError::Bind(config.admin_addr, e))?;

    info!(
        "Proxy listening on http://{} -> {}",
        proxy_listener.local_addr().unwrap_or(config.proxy_addr),
        config.target
    );
    info!(
        "Admin API listening on http://{}",
        admin_listener.local_addr().unwrap_or(config.admin_addr)
    );
    info!(
        "Recording is {} (queue capacity {}, store {})",
        if recording.is_recording() { "on" } else { "off" },
        config.queue_capacity,
        config.db_path.display()
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let proxy_shutdown = shutdown_tx.subscribe();
    let admin_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let proxy = axum::serve(
        proxy_listener,
        http_proxy::router(proxy_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for(proxy_shutdown));
    let admin = axum::serve(admin_listener, admin::router(admin_state))
        .with_graceful_shutdown(wait_for(admin_shutdown));

    let served = tokio::try_join!(async { proxy.await }, async { admin.await });

    // Listeners are closed; let the writer drain whatever is still queued
    info!("Listeners stopped, flushing capture queue");
    let _ = writer_stop_tx.send(());
    if let Err(e) = writer.await {
        error!("Capture writer task failed: {}", e);
    }

    served.map(|_| ()).map_err(StartupError::Serve)
}

async fn wait_for(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, shutting down"),
        _ = terminate => info!("Terminate signal received, shutting down"),
    }
}
