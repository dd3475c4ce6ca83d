//! Bounded retry of registry calls.
//!
//! Transient failures are retried with the same request and an
//! exponential backoff. Terminal failures return immediately.

use std::future::Future;

use tracing::warn;

use upgrid_registry::ClientResult;

use crate::error::{UpgradeError, UpgradeResult};
use crate::options::RetryPolicy;

/// Run `call` until it succeeds, fails terminally, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> UpgradeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff.min(policy.max_backoff);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => {
                return Err(UpgradeError::Terminal {
                    operation: operation.to_string(),
                    source: e,
                });
            }
            Err(e) if attempt >= max_attempts => {
                return Err(UpgradeError::Transient {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    %operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "transient registry failure, retrying"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = backoff.saturating_mul(2).min(policy.max_backoff);
                attempt += 1;
            }
        }
    }
}
