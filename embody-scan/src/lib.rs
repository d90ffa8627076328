//! embody-scan library interface
//!
//! Exposes the pipeline, progress tracking, and HTTP surface for
//! integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod extraction;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod stages;
pub mod storage;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::ScanPipeline;
use crate::progress::ProgressTracker;
use embody_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// The scan pipeline (holds the single-flight registry)
    pub pipeline: Arc<ScanPipeline>,
    /// Progress trackers by scan_id, created on first use
    pub trackers: Arc<RwLock<HashMap<String, Arc<ProgressTracker>>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, pipeline: Arc<ScanPipeline>) -> Self {
        Self {
            db,
            event_bus,
            pipeline,
            trackers: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }

    /// Tracker for a session, creating one on first use
    pub async fn tracker(&self, scan_id: &str) -> Arc<ProgressTracker> {
        let mut trackers = self.trackers.write().await;
        trackers
            .entry(scan_id.to_string())
            .or_insert_with(|| self.pipeline.tracker_for(scan_id))
            .clone()
    }

    /// Tracker for a session, if one was ever created in this process
    pub async fn existing_tracker(&self, scan_id: &str) -> Option<Arc<ProgressTracker>> {
        self.trackers.read().await.get(scan_id).cloned()
    }

    /// Drop a session's tracker once its pipeline has finished. Without this
    /// the map grows by one entry per distinct scan_id for the life of the
    /// process. A retry of the same scan_id gets a fresh tracker on the next
    /// /scan/start.
    pub async fn retire_tracker(&self, scan_id: &str) {
        self.trackers.write().await.remove(scan_id);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::scan_routes())
        .route("/scan/events", get(api::scan_event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
