//! Per-user profile preference storage
//!
//! Key-value rows keyed by (user_id, key). The persistence reconciler writes
//! avatar parameters here under `avatar.*` keys and purges the legacy keys
//! older app versions used.

use crate::db::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::Utc;
use embody_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert or update one preference (upsert on user_id + key)
pub async fn set_pref(pool: &SqlitePool, user_id: Uuid, key: &str, value: &str) -> Result<()> {
    let user_id = user_id.to_string();
    let updated_at = Utc::now().to_rfc3339();

    retry_on_lock(
        || {
            sqlx::query(
                r#"
                INSERT INTO profile_prefs (user_id, key, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(user_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&user_id)
            .bind(key)
            .bind(value)
            .bind(&updated_at)
            .execute(pool)
        },
        DEFAULT_MAX_LOCK_WAIT_MS,
        "set_pref",
    )
    .await?;

    Ok(())
}

/// Read one preference value
pub async fn get_pref(pool: &SqlitePool, user_id: Uuid, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM profile_prefs WHERE user_id = ? AND key = ?")
            .bind(user_id.to_string())
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(Error::Database)?;
    Ok(value)
}

/// Delete the given preference keys, returning how many rows existed
pub async fn delete_prefs(pool: &SqlitePool, user_id: Uuid, keys: &[&str]) -> Result<u64> {
    let user_id = user_id.to_string();
    let mut deleted = 0u64;

    for key in keys {
        let result = retry_on_lock(
            || {
                sqlx::query("DELETE FROM profile_prefs WHERE user_id = ? AND key = ?")
                    .bind(&user_id)
                    .bind(*key)
                    .execute(pool)
            },
            DEFAULT_MAX_LOCK_WAIT_MS,
            "delete_prefs",
        )
        .await?;
        deleted += result.rows_affected();
    }

    Ok(deleted)
}

// ============================================================================
// Tests
// ============================================================================
