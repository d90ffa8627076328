//! Two-location persistence with read-back verification
//!
//! A completed scan lands in two places: the per-user profile preferences
//! (the keys the renderer reads at avatar load) and the scans history table.
//! Older app versions stored avatar data under a different set of preference
//! keys; those are purged on every persist so stale values cannot shadow the
//! canonical ones.
//!
//! After writing, both locations are read back and compared against what was
//! written. A mismatch is reported (an `error!` log plus a
//! `PersistenceAnomaly` event) but never rolled back: the next completed scan
//! overwrites everything.

use crate::db;
use crate::extraction::{normalize_limb_masses, resolve_shape_params, CanonicalSkinTone};
use crate::models::{PipelineResult, ScanRecord, ScanStatus};
use embody_common::events::{EventBus, ScanEvent};
use embody_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const PREF_SHAPE_PARAMS: &str = "avatar.shape_params";
pub const PREF_LIMB_MASSES: &str = "avatar.limb_masses";
pub const PREF_SKIN_TONE: &str = "avatar.skin_tone";
pub const PREF_GENDER: &str = "avatar.gender";
pub const PREF_VERSION: &str = "avatar.version";
pub const PREF_MAPPING_VERSION: &str = "avatar.mapping_version";
pub const PREF_GLTF_MODEL_ID: &str = "avatar.gltf_model_id";

/// Preference keys written by older app versions, removed on every persist
pub const LEGACY_PREF_KEYS: &[&str] = &[
    "body_shape",
    "skin_color",
    "limb_scales",
    "avatar_colors",
    "morph_overrides",
];

/// Round to 3 decimals. Applied once, before any write, so read-back
/// verification compares like with like.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Final canonicalization pass over a pipeline result.
///
/// Parameter maps are run through the allow-list filters one more time and
/// every float is rounded to 3 decimals. Idempotent: canonicalizing an
/// already-canonical result changes nothing.
pub fn canonicalize_result(mut result: PipelineResult) -> PipelineResult {
    result.shape_params = resolve_shape_params(Some(&result.shape_params), None)
        .into_iter()
        .map(|(key, value)| (key, round3(value)))
        .collect();
    result.limb_masses = normalize_limb_masses(&result.limb_masses)
        .into_iter()
        .map(|(key, value)| (key, round3(value)))
        .collect();
    result.skin_tone = round_skin_tone(result.skin_tone);
    result.duration_seconds = round3(result.duration_seconds);
    result
}

fn round_skin_tone(mut tone: CanonicalSkinTone) -> CanonicalSkinTone {
    for channel in tone.srgb.iter_mut() {
        *channel = round3(*channel);
    }
    for channel in tone.linear.iter_mut() {
        *channel = round3(*channel);
    }
    tone.confidence = round3(tone.confidence);
    tone
}

/// Serialize the preference payloads for a canonical result.
///
/// The same strings are used for writing and for read-back comparison.
fn pref_payloads(result: &PipelineResult) -> Result<Vec<(&'static str, String)>> {
    let shape_json = serde_json::to_string(&result.shape_params)
        .map_err(|e| Error::Internal(format!("Failed to serialize shape params: {}", e)))?;
    let limb_json = serde_json::to_string(&result.limb_masses)
        .map_err(|e| Error::Internal(format!("Failed to serialize limb masses: {}", e)))?;
    let tone_json = serde_json::to_string(&result.skin_tone)
        .map_err(|e| Error::Internal(format!("Failed to serialize skin tone: {}", e)))?;

    Ok(vec![
        (PREF_SHAPE_PARAMS, shape_json),
        (PREF_LIMB_MASSES, limb_json),
        (PREF_SKIN_TONE, tone_json),
        (PREF_GENDER, result.gender.as_str().to_string()),
        (PREF_VERSION, result.avatar_version.clone()),
        (PREF_MAPPING_VERSION, result.mapping_version.clone()),
        (PREF_GLTF_MODEL_ID, result.gltf_model_id.clone()),
    ])
}

/// Write a completed scan to both storage locations and verify the writes.
///
/// `result` must already be canonical (see [`canonicalize_result`]) and
/// `record` must be the completed scan row carrying the same values.
/// Verification mismatches are reported but do not fail the operation.
pub async fn persist_scan_outcome(
    pool: &SqlitePool,
    event_bus: &EventBus,
    record: &ScanRecord,
    result: &PipelineResult,
) -> Result<()> {
    let written = pref_payloads(result)?;

    for (key, value) in &written {
        db::profile::set_pref(pool, result.user_id, key, value).await?;
    }

    let purged = db::profile::delete_prefs(pool, result.user_id, LEGACY_PREF_KEYS).await?;
    if purged > 0 {
        info!(
            "Purged {} legacy avatar preference(s) for user {}",
            purged, result.user_id
        );
    }

    db::scans::save_scan(pool, record).await?;

    debug!(
        scan_id = %record.scan_id,
        "Avatar parameters persisted ({} preference keys + scan row)",
        written.len()
    );

    // Read-back verification of both locations
    let pref_mismatches = verify_prefs(pool, result.user_id, &written).await?;
    if !pref_mismatches.is_empty() {
        report_anomaly(
            event_bus,
            &record.scan_id,
            "profile_prefs",
            &pref_mismatches.join("; "),
        );
    }

    if let Some(detail) = verify_scan_row(pool, record, &written).await? {
        report_anomaly(event_bus, &record.scan_id, "scans", &detail);
    }

    Ok(())
}

/// Explicit user skin tone adjustment.
///
/// Re-canonicalizes from the picked RGB (source `user-adjusted`, confidence
/// 1.0), rewrites the preference key, and updates the user's latest completed
/// scan row so history and preferences stay in agreement.
pub async fn apply_user_skin_tone(
    pool: &SqlitePool,
    event_bus: &EventBus,
    user_id: Uuid,
    rgb: [u8; 3],
) -> Result<CanonicalSkinTone> {
    let tone = round_skin_tone(CanonicalSkinTone::user_adjusted(rgb));
    let tone_json = serde_json::to_string(&tone)
        .map_err(|e| Error::Internal(format!("Failed to serialize skin tone: {}", e)))?;

    db::profile::set_pref(pool, user_id, PREF_SKIN_TONE, &tone_json).await?;

    let latest = db::scans::latest_completed_scan(pool, user_id).await?;
    if let Some(mut record) = latest {
        record.skin_tone = Some(tone.clone());
        db::scans::save_scan(pool, &record).await?;
        info!(
            scan_id = %record.scan_id,
            "User adjusted skin tone to {} for user {}",
            tone.hex, user_id
        );

        let written = [(PREF_SKIN_TONE, tone_json)];
        let mismatches = verify_prefs(pool, user_id, &written).await?;
        if !mismatches.is_empty() {
            report_anomaly(
                event_bus,
                &record.scan_id,
                "profile_prefs",
                &mismatches.join("; "),
            );
        }
    } else {
        info!(
            "User adjusted skin tone to {} for user {} (no completed scan on record)",
            tone.hex, user_id
        );
    }

    Ok(tone)
}

/// Compare stored preference values against what was just written
async fn verify_prefs(
    pool: &SqlitePool,
    user_id: Uuid,
    written: &[(&'static str, String)],
) -> Result<Vec<String>> {
    let mut mismatches = Vec::new();
    for (key, expected) in written {
        match db::profile::get_pref(pool, user_id, key).await? {
            Some(actual) if &actual == expected => {}
            Some(_) => mismatches.push(format!("{}: stored value differs from written", key)),
            None => mismatches.push(format!("{}: missing after write", key)),
        }
    }
    Ok(mismatches)
}

/// Compare the stored scan row against the canonical values just written.
///
/// Loaded maps re-serialize key-ordered, so string equality here means the
/// row round-tripped exactly.
async fn verify_scan_row(
    pool: &SqlitePool,
    record: &ScanRecord,
    written: &[(&'static str, String)],
) -> Result<Option<String>> {
    let loaded = match db::scans::load_scan(pool, &record.scan_id).await? {
        Some(loaded) => loaded,
        None => return Ok(Some("scan row missing after write".to_string())),
    };

    let mut problems = Vec::new();

    if loaded.status != ScanStatus::Complete {
        problems.push(format!("status is {} not COMPLETE", loaded.status.as_str()));
    }
    if loaded.server_scan_id != record.server_scan_id {
        problems.push("server_scan_id differs".to_string());
    }

    for (key, expected) in written {
        let stored = match *key {
            PREF_SHAPE_PARAMS => loaded
                .shape_params
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::Internal(format!("Re-serialization failed: {}", e)))?,
            PREF_LIMB_MASSES => loaded
                .limb_masses
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::Internal(format!("Re-serialization failed: {}", e)))?,
            PREF_SKIN_TONE => loaded
                .skin_tone
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::Internal(format!("Re-serialization failed: {}", e)))?,
            _ => continue,
        };
        match stored {
            Some(stored) if &stored == expected => {}
            Some(_) => problems.push(format!("{}: scan row value differs", key)),
            None => problems.push(format!("{}: absent from scan row", key)),
        }
    }

    if problems.is_empty() {
        Ok(None)
    } else {
        Ok(Some(problems.join("; ")))
    }
}

fn report_anomaly(event_bus: &EventBus, scan_id: &str, location: &str, detail: &str) {
    error!(
        scan_id = %scan_id,
        "Persistence verification mismatch in {}: {}",
        location, detail
    );
    event_bus.emit_lossy(ScanEvent::PersistenceAnomaly {
        scan_id: scan_id.to_string(),
        location: location.to_string(),
        detail: detail.to_string(),
        timestamp: chrono::Utc::now(),
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{Gender, SkinToneSource};
    use embody_common::events::ScanFlavor;
    use std::collections::BTreeMap;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn raw_result(scan_id: &str, user_id: Uuid) -> PipelineResult {
        let mut shape_params = BTreeMap::new();
        shape_params.insert("muscle".to_string(), 0.123456);
        shape_params.insert("not_a_real_morph".to_string(), 0.5);
        let mut limb_masses = BTreeMap::new();
        limb_masses.insert("torso".to_string(), 1.23456);
        limb_masses.insert("tail".to_string(), 1.4);
        PipelineResult {
            scan_id: scan_id.to_string(),
            server_scan_id: "srv-1".to_string(),
            user_id,
            gender: Gender::Feminine,
            shape_params,
            limb_masses,
            skin_tone: CanonicalSkinTone::from_rgb([153, 108, 78], SkinToneSource::Analysis, 0.8),
            gltf_model_id: "model-7".to_string(),
            avatar_version: "2".to_string(),
            mapping_version: "m3".to_string(),
            fallback_used: false,
            insights: vec![],
            duration_seconds: 38.4567,
        }
    }

    fn completed_record(result: &PipelineResult, flavor: ScanFlavor) -> ScanRecord {
        let mut record = ScanRecord::new(result.scan_id.clone(), result.user_id, flavor);
        record.complete_with(result);
        record
    }

    #[test]
    fn test_canonicalize_rounds_and_filters() {
        let result = canonicalize_result(raw_result("scan-1", Uuid::new_v4()));

        // Unknown keys dropped, floats rounded to 3 decimals
        assert_eq!(result.shape_params.get("muscle"), Some(&0.123));
        assert!(!result.shape_params.contains_key("not_a_real_morph"));
        assert_eq!(result.limb_masses.get("torso"), Some(&1.235));
        assert!(!result.limb_masses.contains_key("tail"));
        // Missing segments filled with 1.0, gate pinned
        assert_eq!(result.limb_masses.get("thigh"), Some(&1.0));
        assert_eq!(result.limb_masses.get("gate"), Some(&1.0));
        assert_eq!(result.duration_seconds, 38.457);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_result(raw_result("scan-1", Uuid::new_v4()));
        let twice = canonicalize_result(once.clone());
        assert_eq!(once.shape_params, twice.shape_params);
        assert_eq!(once.limb_masses, twice.limb_masses);
        assert_eq!(once.skin_tone, twice.skin_tone);
    }

    #[tokio::test]
    async fn test_persist_writes_prefs_and_scan_row() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let user = Uuid::new_v4();
        let result = canonicalize_result(raw_result("scan-1", user));
        let record = completed_record(&result, ScanFlavor::FirstScan);

        persist_scan_outcome(&pool, &event_bus, &record, &result)
            .await
            .unwrap();

        let gender = db::profile::get_pref(&pool, user, PREF_GENDER).await.unwrap();
        assert_eq!(gender.as_deref(), Some("feminine"));

        let shape = db::profile::get_pref(&pool, user, PREF_SHAPE_PARAMS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shape, serde_json::to_string(&result.shape_params).unwrap());

        let tone = db::profile::get_pref(&pool, user, PREF_SKIN_TONE)
            .await
            .unwrap()
            .unwrap();
        assert!(tone.contains("\"#996C4E\""));

        let row = db::scans::load_scan(&pool, "scan-1").await.unwrap().unwrap();
        assert_eq!(row.status, ScanStatus::Complete);
        assert_eq!(row.gltf_model_id.as_deref(), Some("model-7"));
    }

    #[tokio::test]
    async fn test_persist_purges_legacy_keys() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let user = Uuid::new_v4();

        for key in LEGACY_PREF_KEYS {
            db::profile::set_pref(&pool, user, key, "stale").await.unwrap();
        }

        let result = canonicalize_result(raw_result("scan-1", user));
        let record = completed_record(&result, ScanFlavor::Rescan);
        persist_scan_outcome(&pool, &event_bus, &record, &result)
            .await
            .unwrap();

        for key in LEGACY_PREF_KEYS {
            assert!(
                db::profile::get_pref(&pool, user, key).await.unwrap().is_none(),
                "legacy key {} survived persist",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_clean_persist_emits_no_anomaly() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let mut rx = event_bus.subscribe();
        let user = Uuid::new_v4();
        let result = canonicalize_result(raw_result("scan-1", user));
        let record = completed_record(&result, ScanFlavor::FirstScan);

        persist_scan_outcome(&pool, &event_bus, &record, &result)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_verify_detects_tampered_pref() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let user = Uuid::new_v4();
        let result = canonicalize_result(raw_result("scan-1", user));
        let record = completed_record(&result, ScanFlavor::FirstScan);
        persist_scan_outcome(&pool, &event_bus, &record, &result)
            .await
            .unwrap();

        // Another writer changes the value between write and some later check
        db::profile::set_pref(&pool, user, PREF_GENDER, "masculine")
            .await
            .unwrap();

        let written = pref_payloads(&result).unwrap();
        let mismatches = verify_prefs(&pool, user, &written).await.unwrap();
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].contains(PREF_GENDER));
    }

    #[tokio::test]
    async fn test_verify_reports_missing_scan_row() {
        let pool = test_pool().await;
        let user = Uuid::new_v4();
        let result = canonicalize_result(raw_result("scan-never-saved", user));
        let record = completed_record(&result, ScanFlavor::FirstScan);

        let written = pref_payloads(&result).unwrap();
        let detail = verify_scan_row(&pool, &record, &written).await.unwrap();
        assert_eq!(detail.as_deref(), Some("scan row missing after write"));
    }

    #[tokio::test]
    async fn test_apply_user_skin_tone_updates_pref_and_latest_scan() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let user = Uuid::new_v4();
        let result = canonicalize_result(raw_result("scan-1", user));
        let record = completed_record(&result, ScanFlavor::FirstScan);
        persist_scan_outcome(&pool, &event_bus, &record, &result)
            .await
            .unwrap();

        let tone = apply_user_skin_tone(&pool, &event_bus, user, [10, 20, 30])
            .await
            .unwrap();
        assert_eq!(tone.source, SkinToneSource::UserAdjusted);
        assert_eq!(tone.confidence, 1.0);
        assert_eq!(tone.hex, "#0A141E");

        let stored = db::profile::get_pref(&pool, user, PREF_SKIN_TONE)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.contains("user-adjusted"));
        assert!(stored.contains("\"#0A141E\""));

        let row = db::scans::load_scan(&pool, "scan-1").await.unwrap().unwrap();
        assert_eq!(row.skin_tone.as_ref().unwrap().rgb, [10, 20, 30]);
    }

    #[tokio::test]
    async fn test_apply_user_skin_tone_without_scan_still_writes_pref() {
        let pool = test_pool().await;
        let event_bus = EventBus::new(10);
        let user = Uuid::new_v4();

        apply_user_skin_tone(&pool, &event_bus, user, [200, 150, 120])
            .await
            .unwrap();

        let stored = db::profile::get_pref(&pool, user, PREF_SKIN_TONE)
            .await
            .unwrap();
        assert!(stored.is_some());
    }
}
