use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use super::routes::{AppState, create_router};
use crate::config::{AppConfig, StorageBackendKind};
use crate::observability::init::Telemetry;
use crate::router::RequestRouter;
use crate::services::{MemoryStorage, StorageBackend};

/// Construct the configured storage backend
///
/// The in-memory backend starts with the configured table already created.
pub async fn build_storage(config: &AppConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.storage.backend {
        StorageBackendKind::Memory => {
            let storage = MemoryStorage::with_table(&config.storage.table_name).await;
            Ok(Arc::new(storage))
        }
        #[cfg(feature = "dynamodb")]
        StorageBackendKind::Dynamodb => {
            let storage =
                crate::services::storage::dynamodb::DynamoDbStorage::from_config(&config.storage).await;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "dynamodb"))]
        StorageBackendKind::Dynamodb => Err(anyhow::anyhow!(
            "storage backend 'dynamodb' requires building with the `dynamodb` feature"
        )),
    }
}

/// Start the HTTP server and serve until SIGINT/SIGTERM
///
/// After the signal, in-flight requests get `server.shutdown_timeout` seconds to drain.
pub async fn start_server(config: AppConfig, telemetry: Arc<Telemetry>) -> Result<()> {
    info!(
        "Starting {} on {}:{}",
        config.service.name, config.server.bind, config.server.port
    );

    let storage = build_storage(&config).await?;
    info!(backend = storage.name(), table_name = %config.storage.table_name, "Storage ready");

    let router = Arc::new(RequestRouter::new(telemetry, storage, &config));
    let app = create_router(AppState::new(router));

    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}: {}. Is another process using this port?",
            bind_addr,
            e
        )
    })?;
    info!("Server successfully bound to {}", bind_addr);

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();

    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let drain_deadline = async move {
        if stopping_rx.changed().await.is_ok() {
            tokio::time::sleep(drain_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(
                timeout_seconds = config.server.shutdown_timeout,
                "Graceful shutdown timed out, dropping open connections"
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
///
/// A handler that cannot be installed is logged and never fires; the other signal
/// still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
