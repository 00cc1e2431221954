// Utility helpers

use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::error::Result;

/// Resolves an optional `limit` query parameter to `1..=max`.
pub fn clamp_page_limit(limit: Option<u32>, default: u32, max: u32) -> i64 {
    let max = max.max(1);
    i64::from(limit.unwrap_or(default).clamp(1, max))
}

/// Runs `op` up to `max_attempts` times with linear backoff, returning the
/// last error when every attempt fails.
pub async fn retry_async<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::warn!("{} attempt {}/{} failed: {}", label, attempt, max_attempts, err);
                sleep(backoff.saturating_mul(attempt)).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!("{} failed after {} attempts: {}", label, max_attempts, err);
                return Err(err);
            }
        }
    }
}
