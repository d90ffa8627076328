//! Retry helper for transient SQLite lock contention
//!
//! SQLite returns "database is locked" when a writer collides with another
//! connection. Those failures are transient, so writes go through
//! [`retry_on_lock`], which retries with exponential backoff up to a total
//! wait budget. Any other error is returned immediately.

use embody_common::Error;
use std::time::Duration;
use tokio::time::sleep;

/// Default total wait budget for a single logical write, in milliseconds.
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` while it fails with a SQLite lock error.
///
/// Backoff doubles from 10ms up to a 1000ms cap. Once the accumulated wait
/// exceeds `max_wait_ms` the last lock error is wrapped and returned.
pub async fn retry_on_lock<T, F, Fut>(
    mut operation: F,
    max_wait_ms: u64,
    context: &str,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut waited_ms: u64 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if waited_ms > 0 {
                    tracing::debug!(
                        "{}: succeeded after {}ms of lock contention",
                        context,
                        waited_ms
                    );
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                if waited_ms >= max_wait_ms {
                    tracing::error!(
                        "{}: database still locked after {}ms, giving up",
                        context,
                        waited_ms
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked for more than {}ms: {}",
                        context, max_wait_ms, err
                    )));
                }

                let wait = backoff_ms.min(max_wait_ms - waited_ms);
                if waited_ms >= 1000 {
                    tracing::warn!(
                        "{}: database locked, retrying in {}ms ({}ms waited so far)",
                        context,
                        wait,
                        waited_ms
                    );
                } else {
                    tracing::debug!("{}: database locked, retrying in {}ms", context, wait);
                }

                sleep(Duration::from_millis(wait)).await;
                waited_ms += wait;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => {
                return Err(Error::Database(err));
            }
        }
    }
}

/// True when the sqlx error is SQLite lock contention.
fn is_lock_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("database is locked"),
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
