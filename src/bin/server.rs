//! nsmeta Server Binary
//!
//! Opens the metadata store and serves the HTTP API until Ctrl+C / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use nsmeta::api::{create_router, AppState};
use nsmeta::config::WalSyncStrategy;
use nsmeta::logging::{init_logging, LogFormat};
use nsmeta::{Config, MemoryStore, MetaService};
use tokio::signal;

/// nsmeta Server
#[derive(Parser, Debug)]
#[command(name = "nsmeta-server")]
#[command(about = "Namespace metadata service for a hierarchical filesystem")]
#[command(version)]
struct Args {
    /// Data directory for the WAL; omit to keep metadata in memory only
    #[arg(short, long, env = "NSMETA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long, env = "NSMETA_LISTEN", default_value = "127.0.0.1:8089")]
    listen: String,

    /// Per-request deadline in milliseconds (0 disables it)
    #[arg(short = 't', long, env = "NSMETA_REQUEST_TIMEOUT_MS", default_value = "10000")]
    request_timeout_ms: u64,

    /// fsync the WAL after every commit instead of every N commits
    #[arg(long, env = "NSMETA_SYNC_EVERY_WRITE")]
    sync_every_write: bool,

    /// Commits between WAL syncs
    #[arg(long, env = "NSMETA_SYNC_INTERVAL", default_value = "100")]
    sync_interval: usize,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "NSMETA_LOG_LEVEL", default_value = "info,nsmeta=debug")]
    log_level: String,

    /// Log format: pretty or json
    #[arg(long, env = "NSMETA_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> Config {
        let sync = if self.sync_every_write {
            WalSyncStrategy::EveryWrite
        } else {
            WalSyncStrategy::EveryNEntries {
                count: self.sync_interval.max(1),
            }
        };
        let builder = match self.data_dir {
            Some(dir) => Config::builder().data_dir(dir),
            None => Config::builder().in_memory(),
        };
        builder
            .wal_sync_strategy(sync)
            .listen_addr(self.listen)
            .request_timeout_ms(self.request_timeout_ms)
            .log_level(self.log_level)
            .log_format(LogFormat::from_str_lossy(&self.log_format))
            .build()
    }
}

#[tokio::main]
async fn main() {
    let config = Args::parse().into_config();
    init_logging(&config.log_level, config.log_format);

    tracing::info!("nsmeta server v{}", nsmeta::VERSION);
    match &config.data_dir {
        Some(dir) => tracing::info!("Data directory: {}", dir.display()),
        None => tracing::warn!("No data directory; metadata will not survive restart"),
    }

    let store = match MemoryStore::open(&config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(keys = store.key_count(), "Store opened");

    let service = Arc::new(MetaService::with_memory_store(store.clone()));
    let router = create_router(AppState::new(service.clone(), config.request_timeout()));

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("HTTP API listening on {}", config.listen_addr);

    let shutdown_service = service.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, draining requests");
            shutdown_service.close();
        })
        .await;

    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
    }
    if let Err(e) = store.sync() {
        tracing::error!("Failed to sync WAL: {}", e);
    }

    tracing::info!("Server stopped");
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
