use crate::config::RetryConfig;
use crate::error::Result;
use std::future::Future;
use tracing::warn;

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is exhausted.
///
/// Each attempt must re-read whatever state it depends on; only `Conflict`
/// is retried, with exponential backoff between attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(error) if error.is_retryable() && tries < policy.max_attempts => {
                let delay = policy.delay(tries);
                warn!(
                    operation,
                    attempt = tries,
                    delay_ms = delay.as_millis() as u64,
                    "Storage conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) if error.is_retryable() => {
                warn!(operation, attempts = tries, "Storage conflict, retries exhausted");
                return Err(error);
            }
            other => return other,
        }
    }
}
