//! Uniform retry policy for external calls.
//!
//! | Class        | Reaction                                              |
//! |--------------|-------------------------------------------------------|
//! | Transient    | exponential back-off, `base × 2^(n-1)` ± 25 % jitter  |
//! | RateLimited  | wait the delay the service/limiter asked for          |
//! | Permanent    | give up immediately                                   |
//!
//! Delays are capped at 60 s; a rate-limit delay beyond the cap ends the
//! call instead of parking the run.

use std::future::Future;
use std::time::Duration;

use trendbot_core::{ErrorClass, RetrySettings, ServiceError};

const MAX_DELAY_MS: u64 = 60_000;

/// Result of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct CallOutcome<T> {
    pub result: Result<T, ServiceError>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_base_ms: settings.backoff_base_ms,
        }
    }

    /// Delay before retry number `retry` (1-based), or `None` to give up.
    fn delay_for(&self, err: &ServiceError, retry: u32) -> Option<Duration> {
        match err.class() {
            ErrorClass::Permanent => None,
            ErrorClass::RateLimited => match err.retry_after_ms() {
                Some(ms) if ms > MAX_DELAY_MS => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => Some(self.backoff(retry)),
            },
            ErrorClass::Transient => Some(self.backoff(retry)),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let computed = self
            .backoff_base_ms
            .saturating_mul(1u64 << retry.saturating_sub(1).min(10));
        let capped = computed.min(MAX_DELAY_MS);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
        Duration::from_millis(jittered.min(MAX_DELAY_MS))
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, service: &str, mut operation: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match operation().await {
                Ok(value) => {
                    return CallOutcome {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(err) => err,
            };

            let delay = if attempts >= self.max_attempts {
                None
            } else {
                self.delay_for(&err, attempts)
            };
            let Some(delay) = delay else {
                return CallOutcome {
                    result: Err(err),
                    attempts,
                };
            };

            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::warn!(
                service,
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms,
                class = %err.class(),
                error = %err,
                "external call failed, retrying after back-off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
