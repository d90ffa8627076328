//! embody-scan - Body Scan Processing Service
//!
//! Runs the two-photo scan pipeline: photo upload, staged analysis against
//! the remote analysis service, canonical extraction, and reconciled
//! persistence. Serves the capture/processing UI over HTTP REST + SSE.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use embody_common::config;
use embody_common::events::EventBus;
use embody_scan::pipeline::ScanPipeline;
use embody_scan::stages::{AnalysisStages, HttpAnalysisClient};
use embody_scan::storage::{HttpPhotoStore, PhotoStore};
use embody_scan::AppState;

/// Tracing directives used when neither RUST_LOG nor the config file sets any
const DEFAULT_LOG_FILTER: &str = "embody_scan=debug,embody_common=info,info";

/// Command-line arguments for embody-scan
#[derive(Parser, Debug)]
#[command(name = "embody-scan")]
#[command(about = "Body scan processing service")]
#[command(version)]
struct Args {
    /// Root folder holding the database and config file
    /// (falls back to EMBODY_ROOT_FOLDER, then the OS data directory)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Port to listen on (overrides config file and EMBODY_SCAN_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Resolve root folder and load layered config before tracing
    // init, so a config-supplied log filter can take effect
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref())
        .context("Failed to resolve root folder")?;
    config::write_default_config(&root_folder).context("Failed to write default config")?;
    let service_config =
        config::load_service_config(&root_folder).context("Failed to load config")?;

    // Initialize tracing: RUST_LOG wins, then the config file, then defaults
    let directives = service_config
        .log_filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = args.port.unwrap_or(service_config.port);

    info!("Starting embody-scan (Body Scan Processing) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", root_folder.display());
    info!("Analysis service: {}", service_config.analysis_url);
    info!("Photo storage: {}", service_config.storage_url);

    // Step 2: Open or create database
    let db_path = root_folder.join("embody.db");
    info!("Database: {}", db_path.display());
    let db_pool = embody_scan::db::init_db_pool(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    // Step 3: Fail scans left mid-flight by an earlier process
    let stale = embody_scan::db::scans::cleanup_stale_scans(&db_pool)
        .await
        .context("Failed to clean up stale scans")?;
    if stale > 0 {
        info!("Marked {} stale scan(s) as failed after restart", stale);
    }

    // Create event bus for SSE broadcasting
    let event_bus = EventBus::new(100); // 100 event capacity
    info!("Event bus initialized");

    // Remote service clients behind the stage/storage trait seams
    let analysis: Arc<dyn AnalysisStages> =
        Arc::new(HttpAnalysisClient::new(&service_config.analysis_url)
            .context("Failed to build analysis client")?);
    let photos: Arc<dyn PhotoStore> = Arc::new(
        HttpPhotoStore::new(&service_config.storage_url)
            .context("Failed to build photo storage client")?,
    );

    let pipeline = Arc::new(ScanPipeline::new(
        db_pool.clone(),
        event_bus.clone(),
        analysis,
        photos,
    ));
    let state = AppState::new(db_pool, event_bus, pipeline);

    // Build router
    let app = embody_scan::build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
