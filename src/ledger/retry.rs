use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::StoreConfig;
use crate::error::Result;

/// Ceiling on a single backoff sleep regardless of attempt count
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Delay before retry number `attempt` (1-based): `backoff * 2^(attempt-1)`, capped.
fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(backoff_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// Run a store operation, retrying transient failures with exponential backoff.
///
/// Non-retryable errors are returned immediately. After `retry_attempts`
/// attempts the last error is returned.
pub async fn with_store_retry<T, F, Fut>(policy: &StoreConfig, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.retry_attempts.max(1);
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempts < max_attempts => {
                warn!("{} attempt {} failed: {}. Retrying...", op, attempts, e);
                sleep(backoff_delay(policy.retry_backoff_ms, attempts)).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!("{} failed after {} attempts: {}", op, attempts, e);
                }
                return Err(e);
            }
        }
    }
}
