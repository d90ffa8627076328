//! Scan API handlers
//!
//! POST /scan/start, GET /scan/status/{scan_id}, POST /scan/{scan_id}/skin-tone

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use embody_common::events::{ScanFlavor, ScanPhase};

use crate::{
    error::{ApiError, ApiResult},
    extraction::CanonicalSkinTone,
    models::{BiometricProfile, CapturedPhoto, PhotoView, ScanRecord, ScanRequest, ScanStatus},
    progress::ProgressSnapshot,
    AppState,
};

/// POST /scan/start request
#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    /// Client-assigned scan identifier, stable across retries of the same scan
    pub scan_id: String,
    pub user_id: Uuid,
    pub flavor: ScanFlavor,
    pub profile: BiometricProfile,
    /// Base64-encoded front photo
    pub front_photo: String,
    /// Base64-encoded profile photo
    pub profile_photo: String,
}

/// POST /scan/start response
#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub scan_id: String,
    pub phase: ScanPhase,
    pub started_at: DateTime<Utc>,
}

/// GET /scan/status/{scan_id} response
#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    pub scan_id: String,
    pub status: ScanStatus,
    pub flavor: ScanFlavor,
    /// Live tracker snapshot; None when no tracker exists for this scan
    /// (the pipeline finished and retired it, or the service restarted)
    pub progress: Option<ProgressSnapshot>,
    pub server_scan_id: Option<String>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// POST /scan/{scan_id}/skin-tone request
#[derive(Debug, Deserialize)]
pub struct AdjustSkinToneRequest {
    /// Picked color as [r, g, b]
    pub rgb: [u8; 3],
}

/// POST /scan/{scan_id}/skin-tone response
#[derive(Debug, Serialize)]
pub struct AdjustSkinToneResponse {
    pub scan_id: String,
    pub skin_tone: CanonicalSkinTone,
}

/// POST /scan/start
///
/// Begin a scan session. Validates the request, claims the per-scan
/// single-flight guard, persists the initial record, then runs the pipeline
/// in a background task. Returns 202 Accepted immediately; progress arrives
/// via GET /scan/status and the SSE stream.
pub async fn start_scan(
    State(state): State<AppState>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<(StatusCode, Json<StartScanResponse>)> {
    if request.scan_id.trim().is_empty() {
        return Err(ApiError::BadRequest("scan_id must not be empty".to_string()));
    }
    if !request.profile.is_complete() {
        return Err(ApiError::BadRequest(
            "Biometric profile is incomplete: height and weight must be positive".to_string(),
        ));
    }

    let front = decode_photo(PhotoView::Front, &request.front_photo)?;
    let profile_photo = decode_photo(PhotoView::Profile, &request.profile_photo)?;

    // Claim the single-flight guard before acknowledging, so a duplicate
    // request racing this one gets its 409 here rather than a second pipeline.
    let guard = state
        .pipeline
        .registry()
        .claim(&request.scan_id)
        .ok_or_else(|| {
            ApiError::Conflict(format!("Scan already running: {}", request.scan_id))
        })?;

    let tracker = state.tracker(&request.scan_id).await;
    // A retry of a finished scan reuses the tracker; clear leftover state so
    // status polls between the 202 and pipeline entry see a fresh session.
    tracker.reset().await;

    let record = ScanRecord::new(request.scan_id.clone(), request.user_id, request.flavor);
    let response = StartScanResponse {
        scan_id: record.scan_id.clone(),
        phase: ScanPhase::Capture,
        started_at: record.started_at,
    };

    crate::db::scans::save_scan(&state.db, &record).await?;

    tracing::info!(
        scan_id = %response.scan_id,
        user_id = %request.user_id,
        flavor = %request.flavor.as_str(),
        "Scan session accepted and persisted"
    );

    let scan_request = ScanRequest {
        scan_id: request.scan_id.clone(),
        user_id: request.user_id,
        profile: request.profile,
        front_photo: front,
        profile_photo,
        flavor: request.flavor,
    };

    // Run the pipeline off the request path; the guard travels into the task
    // and releases on completion.
    let pipeline = state.pipeline.clone();
    let task_state = state.clone();
    let scan_id = request.scan_id.clone();
    tokio::spawn(async move {
        match pipeline.run_with_guard(guard, scan_request, &tracker).await {
            Ok(result) => {
                tracing::info!(
                    scan_id = %result.scan_id,
                    server_scan_id = %result.server_scan_id,
                    fallback_used = result.fallback_used,
                    "Background scan pipeline completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    scan_id = %scan_id,
                    error = %e,
                    "Background scan pipeline failed"
                );
            }
        }
        // The scans row is now the durable record for this session; retire
        // the tracker so finished scans do not accumulate in memory.
        task_state.retire_tracker(&scan_id).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /scan/status/{scan_id}
///
/// Poll scan progress. Combines the persisted record with the live tracker
/// snapshot when one exists.
pub async fn scan_status(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> ApiResult<Json<ScanStatusResponse>> {
    let record = crate::db::scans::load_scan(&state.db, &scan_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan not found: {}", scan_id)))?;

    let progress = match state.existing_tracker(&scan_id).await {
        Some(tracker) => Some(tracker.snapshot().await),
        None => None,
    };

    tracing::debug!(scan_id = %scan_id, status = ?record.status, "Status query");

    Ok(Json(ScanStatusResponse {
        scan_id: record.scan_id,
        status: record.status,
        flavor: record.flavor,
        progress,
        server_scan_id: record.server_scan_id,
        fallback_used: record.fallback_used,
        error: record.error,
        started_at: record.started_at,
        ended_at: record.ended_at,
    }))
}

/// POST /scan/{scan_id}/skin-tone
///
/// Apply a user skin-tone adjustment after the reveal. The picked color is
/// re-canonicalized at full confidence and written through to preferences
/// and the latest completed scan.
pub async fn adjust_skin_tone(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
    Json(request): Json<AdjustSkinToneRequest>,
) -> ApiResult<Json<AdjustSkinToneResponse>> {
    let record = crate::db::scans::load_scan(&state.db, &scan_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scan not found: {}", scan_id)))?;

    if record.status != ScanStatus::Complete {
        return Err(ApiError::BadRequest(format!(
            "Scan {} is not complete; skin tone can only be adjusted after the reveal",
            scan_id
        )));
    }

    let tone = crate::persist::apply_user_skin_tone(
        &state.db,
        &state.event_bus,
        record.user_id,
        request.rgb,
    )
    .await?;

    Ok(Json(AdjustSkinToneResponse {
        scan_id,
        skin_tone: tone,
    }))
}

fn decode_photo(view: PhotoView, encoded: &str) -> Result<CapturedPhoto, ApiError> {
    let data = general_purpose::STANDARD.decode(encoded).map_err(|e| {
        ApiError::BadRequest(format!("Invalid base64 for {} photo: {}", view.as_str(), e))
    })?;
    if data.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "{} photo is empty",
            view.as_str()
        )));
    }
    Ok(CapturedPhoto::new(view, data))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scan/start", post(start_scan))
        .route("/scan/status/:scan_id", get(scan_status))
        .route("/scan/:scan_id/skin-tone", post(adjust_skin_tone))
}
