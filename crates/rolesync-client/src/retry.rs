//! Retry with exponential backoff for role mutations.
//!
//! Only mutations go through this policy. Roster pages and audit messages
//! are single-attempt.

use crate::error::{PlatformError, PlatformResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including `Retry-After` hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &PlatformError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        error.is_retryable() || error.is_server_error()
    }

    /// Delay before the next attempt.
    ///
    /// A rate-limit response's `Retry-After` wins over the exponential
    /// schedule. Both are capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &PlatformError) -> Duration {
        let delay = if let PlatformError::RateLimited {
            retry_after: Some(retry_after),
        } = error
        {
            *retry_after
        } else {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
        };
        delay.min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails permanently, or the budget runs out.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> PlatformResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = PlatformResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        let transient = error.is_retryable() || error.is_server_error();
                        if transient && attempt >= self.max_retries && attempt > 0 {
                            warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                error = %error,
                                "Max retries exceeded"
                            );
                            return Err(PlatformError::MaxRetriesExceeded {
                                attempts: attempt + 1,
                                message: format!("{operation_name}: {error}"),
                            });
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
