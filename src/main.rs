// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! whoop-sync server
//!
//! Runs the sync scheduler in the background and serves the health, OAuth
//! and admin endpoints until SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whoop_sync::{
    config::{Config, StorageBackend},
    db::{CredentialRepo, FirestoreDb, MemoryDb, RecordRepo},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        backend = ?config.storage_backend,
        "Starting whoop-sync"
    );

    let (credential_repo, record_repo): (Arc<dyn CredentialRepo>, Arc<dyn RecordRepo>) =
        match config.storage_backend {
            StorageBackend::Firestore => {
                let db = Arc::new(
                    FirestoreDb::new(&config.gcp_project_id)
                        .await
                        .expect("Failed to connect to Firestore"),
                );
                (db.clone() as Arc<dyn CredentialRepo>, db as Arc<dyn RecordRepo>)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on exit");
                let db = Arc::new(MemoryDb::new());
                (db.clone() as Arc<dyn CredentialRepo>, db as Arc<dyn RecordRepo>)
            }
        };

    let state = Arc::new(
        AppState::build(config.clone(), credential_repo, record_repo)
            .expect("Failed to initialize services"),
    );

    // Scheduler runs until the shutdown flag flips
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = state.scheduler.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // Build router
    let app = whoop_sync::routes::create_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Let in-flight user syncs finish
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("whoop_sync=debug".parse().expect("valid directive"))
                .add_directive("info".parse().expect("valid directive")),
        )
        .with(format)
        .init();
}
