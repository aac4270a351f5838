//! Retry wrapper for SQLite lock contention
//!
//! The enqueue endpoint and overlapping ticks write to the same tables;
//! even under WAL a writer can hit "database is locked". Only that error
//! is retried, with bounded exponential backoff; anything else returns
//! immediately.

use std::time::{Duration, Instant};

use mscan_common::{Error, Result};

/// Total time budget before giving up on a locked database
const MAX_LOCK_WAIT_MS: u64 = 5000;

pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_wait = Duration::from_millis(MAX_LOCK_WAIT_MS);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after lock retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = matches!(
                    &err,
                    Error::Database(db_err) if db_err.to_string().contains("database is locked")
                );
                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start.elapsed();
                if elapsed >= max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Giving up on locked database"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms)",
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
