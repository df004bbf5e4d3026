//! Flash-sale service binary.
//!
//! Bootstraps the durable writer, recovers the first engine generation for
//! the current sale window, starts the hourly rotation task, and serves
//! the HTTP API until SIGINT/SIGTERM.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

mod config;

use std::sync::Arc;

use anyhow::Context;
use flashsale_core::{GenerationManager, SystemClock};
use flashsale_postgres::{PgDurableWriter, RetryPolicy};
use flashsale_web::{build_router, AppState};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashsale=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flash-sale service");

    let config = Config::from_env();
    info!(
        database_url = %config.database.url,
        items = config.sale.item_count,
        per_user_limit = config.sale.per_user_limit,
        "Configuration loaded"
    );

    info!("Connecting to the durable store...");
    let writer = Arc::new(
        PgDurableWriter::connect_with_retry(
            &config.database.url,
            config.database.max_connections,
            &RetryPolicy::default(),
        )
        .await
        .context("failed to connect to the durable store")?,
    );
    writer
        .migrate()
        .await
        .context("failed to run migrations")?;
    info!("Durable store ready");

    info!("Recovering the initial generation...");
    let manager = Arc::new(
        GenerationManager::start(config.sale.clone(), Arc::new(SystemClock), writer)
            .await
            .context("failed to bootstrap the initial generation")?,
    );
    info!(
        window_id = manager.current_engine().window_id(),
        "Initial generation accepting requests"
    );

    // Window rotation runs until shutdown is signalled.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rotation = tokio::spawn(Arc::clone(&manager).run_rotation(shutdown_rx));

    let app = build_router(AppState::new(Arc::clone(&manager)));
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped, draining the current generation");
    let _ = shutdown_tx.send(true);
    let _ = rotation.await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
