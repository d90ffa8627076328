//! Health check endpoint
//!
//! Reports service identity, uptime, and build provenance for monitoring.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (e.g., "ok", "degraded", "error")
    pub status: String,
    /// Service name ("embody-scan")
    pub service: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Short git hash the binary was built from
    pub git_hash: String,
    /// UTC timestamp of the build
    pub built_at: String,
}

/// GET /health
///
/// Health check endpoint for monitoring. Returns real uptime computed
/// from the startup timestamp rather than a static "ok".
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Calculate uptime from startup timestamp
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        service: "embody-scan".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        git_hash: env!("GIT_HASH").to_string(),
        built_at: env!("BUILD_TIMESTAMP").to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
