//! Retry with exponential backoff for transient source failures

use std::future::Future;
use std::time::Duration;

/// Errors that can classify themselves as worth retrying.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry behavior for one logical source operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the backoff delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay for a given attempt (1-indexed): initial_delay * 2^(attempt-1), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt - 1));
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, retrying retryable errors with backoff.
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion or a
/// non-retryable error.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(v) => {
                if attempt > 0 {
                    log::info!("'{operation_name}' succeeded after {attempt} retries");
                }
                return Ok(v);
            }
            Err(e) if attempt < config.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "'{operation_name}' failed (attempt {attempt}/{}): {e}, retrying in {delay:?}",
                    config.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("'{operation_name}' failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
