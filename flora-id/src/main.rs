//! flora-id - Plant identification service
//!
//! Startup order: logging → configuration → root folder → database →
//! components → housekeeping → HTTP server. Shutdown (Ctrl+C / SIGTERM)
//! cancels the root token, drains in-flight requests, stops housekeeping and
//! closes the pool.

use anyhow::{Context, Result};
use clap::Parser;
use flora_common::config::{ensure_root_folder, locate_config_file, resolve_root_folder};
use flora_id::config::Settings;
use flora_id::db::{init_database_pool, DB_FILE_NAME};
use flora_id::{bootstrap, build_router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for flora-id
#[derive(Parser, Debug)]
#[command(name = "flora-id")]
#[command(about = "Plant identification service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding flora.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Listen address (overrides server.bind)
    #[arg(short, long, env = "FLORA_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref(), "FLORA_CONFIG", "flora-id.toml");
    // Peek at the logging level before the subscriber exists; errors are
    // reported properly by the full load below
    let log_level = config_path
        .as_deref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Settings>(&content).ok())
        .map(|settings| settings.logging.level)
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting flora-id v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let settings = Settings::load(config_path.as_deref()).context("Invalid configuration")?;
    let settings = Arc::new(settings);

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "FLORA_ROOT_FOLDER",
        settings.root_folder.as_deref(),
    );
    let db_path = ensure_root_folder(&root_folder, DB_FILE_NAME)?;
    info!("Database: {}", db_path.display());

    let db_pool = init_database_pool(&db_path).await?;
    info!("Database connection established");

    let orchestrator = Arc::new(bootstrap::build_orchestrator(&settings, &db_pool).await?);

    let shutdown = CancellationToken::new();
    let housekeeping = tokio::spawn(flora_id::pipeline::run_housekeeping(
        orchestrator.clone(),
        Duration::from_secs(settings.cache.sweep_interval_secs),
        shutdown.clone(),
    ));

    let state = AppState::new(settings.clone(), db_pool.clone(), orchestrator, shutdown.clone());
    let app = build_router(state);

    let bind = args.bind.unwrap_or_else(|| settings.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);

    let root = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        root.cancel();
    })
    .await
    .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = housekeeping.await {
        warn!("Housekeeping task ended abnormally: {}", e);
    }
    db_pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
