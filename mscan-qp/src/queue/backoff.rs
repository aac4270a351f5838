//! Retry backoff policy
//!
//! A small monotonic step function rather than exponential backoff:
//! max_attempts is small (default 3) and the scheduler interval already
//! rate-limits total throughput, so steps of 5 minutes capped at 15 are
//! enough to throttle a flaky external dependency.

use chrono::Duration;

/// Delay before the next attempt, given the number of attempts made so far
///
/// Attempt 1 -> 5 minutes, attempt 2 -> 10 minutes, attempt 3+ -> 15.
pub fn retry_delay(attempts: u32) -> Duration {
    let minutes = (5 * attempts as i64).clamp(5, 15);
    Duration::minutes(minutes)
}
