//! Retry with exponential backoff and jitter.
//!
//! Wraps one remote call. Transient failures (rate limits, 5xx) are retried
//! with `base * 2^(attempt-1) + uniform(0, jitter)` delays until the attempt
//! ceiling is reached; anything else is returned at once. The executor knows
//! nothing about datasets or caching.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sheetline_core::{ErrorClass, RemoteError, RetryConfig};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config.base_delay.saturating_mul(factor)
    }

    /// Delay after failed attempt `attempt` (1-based), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let max_jitter_ms = self.config.max_jitter.as_millis() as u64;
        if max_jitter_ms == 0 {
            return base;
        }
        let jitter_ms = rand::rng().random_range(0..=max_jitter_ms);
        base.saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Run `call` until it succeeds, fails non-transiently, or the attempt
    /// ceiling is reached. On exhaustion the last error is returned.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let err = match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.classify() != ErrorClass::Transient {
                return Err(err);
            }

            if attempt == max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    code = err.code,
                    message = %err.message,
                    "Retry budget exhausted"
                );
                last_error = Some(err);
                break;
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                code = err.code,
                message = %err.message,
                "Transient remote failure, backing off"
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        }

        Err(last_error.unwrap_or_else(|| RemoteError::transport("retry loop made no attempts")))
    }
}
