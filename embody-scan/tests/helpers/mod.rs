//! Test Helper Utilities
//!
//! Shared fakes and builders for embody-scan integration tests

pub mod fakes;

// Re-export commonly used items
pub use fakes::{FakePhotoStore, ScriptedAnalysis};

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use embody_common::events::{EventBus, ScanEvent, ScanFlavor};
use embody_scan::models::{BiometricProfile, CapturedPhoto, DeclaredSex, PhotoView, ScanRequest};
use embody_scan::pipeline::ScanPipeline;
use embody_scan::progress::SimulationConfig;
use embody_scan::stages::AnalysisStages;
use embody_scan::storage::PhotoStore;

/// Create a temporary file-backed test database with tables applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for the
/// duration of the test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test_embody.db");

    let pool = embody_scan::db::init_db_pool(&db_path)
        .await
        .expect("Failed to initialize test database");

    (temp_dir, pool)
}

/// Simulation timing compressed so a full pipeline run takes well under a
/// second
pub fn fast_sim_config() -> SimulationConfig {
    SimulationConfig {
        step_interval: Duration::from_millis(20),
        tick_interval: Duration::from_millis(5),
        hold_fraction: 0.95,
    }
}

/// Pipeline wired to the given doubles, with compressed simulation timing
pub fn build_pipeline(
    pool: &SqlitePool,
    event_bus: &EventBus,
    analysis: Arc<dyn AnalysisStages>,
    photos: Arc<dyn PhotoStore>,
) -> Arc<ScanPipeline> {
    Arc::new(
        ScanPipeline::new(pool.clone(), event_bus.clone(), analysis, photos)
            .with_sim_config(fast_sim_config()),
    )
}

/// Complete biometric profile
pub fn test_profile() -> BiometricProfile {
    BiometricProfile {
        sex: DeclaredSex::Female,
        height_cm: 170.0,
        weight_kg: 65.0,
        age_years: Some(31),
    }
}

/// Well-formed scan request with tiny photo payloads
pub fn test_request(scan_id: &str, user_id: Uuid, flavor: ScanFlavor) -> ScanRequest {
    ScanRequest {
        scan_id: scan_id.to_string(),
        user_id,
        profile: test_profile(),
        front_photo: CapturedPhoto::new(PhotoView::Front, vec![0xFF, 0xD8, 0x01]),
        profile_photo: CapturedPhoto::new(PhotoView::Profile, vec![0xFF, 0xD8, 0x02]),
        flavor,
    }
}

/// Drain every event currently buffered on the receiver
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
