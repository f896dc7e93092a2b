//! Async retry with capped exponential backoff

use std::time::Duration;

/// Attempt limit and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Retry an async operation, returning `Ok((value, attempts))` or `Err((error, attempts))`
///
/// The operation is rebuilt on every attempt, so it may own one-shot resources.
pub async fn retry_with_backoff_async<F, Fut, T, E>(
    policy: RetryPolicy,
    operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if_async(policy, |_| true, operation).await
}

/// Like [`retry_with_backoff_async`], giving up at once on errors `retryable` rejects
pub async fn retry_with_backoff_if_async<F, Fut, T, E, R>(
    policy: RetryPolicy,
    retryable: R,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation(attempts).await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if attempts >= policy.max_attempts.max(1) || !retryable(&e) {
                    return Err((e, attempts));
                }
                let delay = policy.delay(attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
