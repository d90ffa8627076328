//! Scan record storage
//!
//! One row per scan session, keyed by the client-assigned scan_id. Writes go
//! through [`retry_on_lock`]; parameter maps and insights are stored as JSON
//! text columns.

use crate::db::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::extraction::{CanonicalSkinTone, Gender};
use crate::models::{ScanRecord, ScanStatus};
use chrono::{DateTime, Utc};
use embody_common::events::ScanFlavor;
use embody_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Insert or update a scan record (upsert on scan_id)
pub async fn save_scan(pool: &SqlitePool, record: &ScanRecord) -> Result<()> {
    // Serialize JSON columns before entering the retry loop
    let user_id = record.user_id.to_string();
    let status = record.status.as_str();
    let flavor = record.flavor.as_str();
    let gender = record.gender.map(|g| g.as_str());
    let shape_params = record
        .shape_params
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize shape params: {}", e)))?;
    let limb_masses = record
        .limb_masses
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize limb masses: {}", e)))?;
    let skin_tone = record
        .skin_tone
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize skin tone: {}", e)))?;
    let insights = serde_json::to_string(&record.insights)
        .map_err(|e| Error::Internal(format!("Failed to serialize insights: {}", e)))?;
    let started_at = record.started_at.to_rfc3339();
    let ended_at = record.ended_at.map(|t| t.to_rfc3339());

    retry_on_lock(
        || {
            sqlx::query(
                r#"
                INSERT INTO scans (
                    scan_id, user_id, status, flavor, server_scan_id, gender,
                    shape_params, limb_masses, skin_tone, avatar_version,
                    mapping_version, gltf_model_id, fallback_used, insights,
                    error, started_at, ended_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(scan_id) DO UPDATE SET
                    status = excluded.status,
                    server_scan_id = excluded.server_scan_id,
                    gender = excluded.gender,
                    shape_params = excluded.shape_params,
                    limb_masses = excluded.limb_masses,
                    skin_tone = excluded.skin_tone,
                    avatar_version = excluded.avatar_version,
                    mapping_version = excluded.mapping_version,
                    gltf_model_id = excluded.gltf_model_id,
                    fallback_used = excluded.fallback_used,
                    insights = excluded.insights,
                    error = excluded.error,
                    ended_at = excluded.ended_at
                "#,
            )
            .bind(&record.scan_id)
            .bind(&user_id)
            .bind(status)
            .bind(flavor)
            .bind(&record.server_scan_id)
            .bind(gender)
            .bind(&shape_params)
            .bind(&limb_masses)
            .bind(&skin_tone)
            .bind(&record.avatar_version)
            .bind(&record.mapping_version)
            .bind(&record.gltf_model_id)
            .bind(record.fallback_used)
            .bind(&insights)
            .bind(&record.error)
            .bind(&started_at)
            .bind(&ended_at)
            .execute(pool)
        },
        DEFAULT_MAX_LOCK_WAIT_MS,
        "save_scan",
    )
    .await?;

    Ok(())
}

/// Load a scan record by scan_id
pub async fn load_scan(pool: &SqlitePool, scan_id: &str) -> Result<Option<ScanRecord>> {
    let row = sqlx::query("SELECT * FROM scans WHERE scan_id = ?")
        .bind(scan_id)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)?;

    match row {
        Some(row) => Ok(Some(record_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Most recent completed scan for a user, if any
///
/// Used by the skin tone adjustment endpoint: the adjusted tone is written
/// back onto the user's latest completed scan.
pub async fn latest_completed_scan(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<ScanRecord>> {
    let row = sqlx::query(
        "SELECT * FROM scans WHERE user_id = ? AND status = 'COMPLETE' \
         ORDER BY started_at DESC LIMIT 1",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(Error::Database)?;

    match row {
        Some(row) => Ok(Some(record_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Mark scans left in PROCESSING by a previous run as failed
///
/// Called once at startup. A row can only be PROCESSING while a pipeline task
/// holds its guard; after a restart no such task exists.
pub async fn cleanup_stale_scans(pool: &SqlitePool) -> Result<u64> {
    let ended_at = Utc::now().to_rfc3339();
    let result = retry_on_lock(
        || {
            sqlx::query(
                "UPDATE scans SET status = 'FAILED', \
                 error = 'Service restarted while scan was in progress', \
                 ended_at = ? WHERE status = 'PROCESSING'",
            )
            .bind(&ended_at)
            .execute(pool)
        },
        DEFAULT_MAX_LOCK_WAIT_MS,
        "cleanup_stale_scans",
    )
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        tracing::warn!("Marked {} stale scan(s) from a previous run as FAILED", count);
    }
    Ok(count)
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScanRecord> {
    let scan_id: String = row.get("scan_id");
    let user_id_str: String = row.get("user_id");
    let status_str: String = row.get("status");
    let flavor_str: String = row.get("flavor");
    let gender_str: Option<String> = row.get("gender");
    let shape_params_json: Option<String> = row.get("shape_params");
    let limb_masses_json: Option<String> = row.get("limb_masses");
    let skin_tone_json: Option<String> = row.get("skin_tone");
    let insights_json: String = row.get("insights");
    let started_at_str: String = row.get("started_at");
    let ended_at_str: Option<String> = row.get("ended_at");

    let user_id = Uuid::parse_str(&user_id_str)
        .map_err(|e| Error::Internal(format!("Invalid user_id in scans row: {}", e)))?;
    let status = ScanStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown scan status: {}", status_str)))?;
    let flavor = ScanFlavor::parse(&flavor_str)
        .ok_or_else(|| Error::Internal(format!("Unknown scan flavor: {}", flavor_str)))?;
    let gender = match gender_str {
        Some(s) => Some(
            Gender::parse(&s)
                .ok_or_else(|| Error::Internal(format!("Unknown gender: {}", s)))?,
        ),
        None => None,
    };
    let shape_params: Option<BTreeMap<String, f64>> = shape_params_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Invalid shape params JSON: {}", e)))?;
    let limb_masses: Option<BTreeMap<String, f64>> = limb_masses_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Invalid limb masses JSON: {}", e)))?;
    let skin_tone: Option<CanonicalSkinTone> = skin_tone_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("Invalid skin tone JSON: {}", e)))?;
    let insights: Vec<String> = serde_json::from_str(&insights_json)
        .map_err(|e| Error::Internal(format!("Invalid insights JSON: {}", e)))?;
    let started_at = parse_timestamp(&started_at_str)?;
    let ended_at = ended_at_str.as_deref().map(parse_timestamp).transpose()?;

    Ok(ScanRecord {
        scan_id,
        user_id,
        status,
        flavor,
        server_scan_id: row.get("server_scan_id"),
        gender,
        shape_params,
        limb_masses,
        skin_tone,
        avatar_version: row.get("avatar_version"),
        mapping_version: row.get("mapping_version"),
        gltf_model_id: row.get("gltf_model_id"),
        fallback_used: row.get("fallback_used"),
        insights,
        error: row.get("error"),
        started_at,
        ended_at,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", s, e)))
}

// ============================================================================
// Tests
// ============================================================================
