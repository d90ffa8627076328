//! Database access for embody-scan
//!
//! One SQLite file (`embody.db` in the root folder) holds the scan records
//! and per-user profile preferences. Schema is created on startup.

pub mod profile;
pub mod retry;
pub mod scans;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_db_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the embody-scan tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scans (
            scan_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            flavor TEXT NOT NULL,
            server_scan_id TEXT,
            gender TEXT,
            shape_params TEXT,
            limb_masses TEXT,
            skin_tone TEXT,
            avatar_version TEXT,
            mapping_version TEXT,
            gltf_model_id TEXT,
            fallback_used INTEGER NOT NULL DEFAULT 0,
            insights TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profile_prefs (
            user_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (scans, profile_prefs)");

    Ok(())
}
