use std::future::Future;
use std::time::Duration;

use trendbot_core::{RateLimitSettings, RetrySettings, ServiceError};

use crate::rate_limit::RateLimiter;
use crate::retry::{CallOutcome, RetryPolicy};

/// Wraps every call to one external service in limiter, timeout and retry.
///
/// Each attempt first takes a limiter slot, then runs under the per-call
/// timeout. Limiter refusals and timeouts feed the retry policy like any
/// other classified failure.
#[derive(Debug, Clone)]
pub struct ServiceGuard {
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ServiceGuard {
    #[must_use]
    pub fn new(
        service: &str,
        rate: &RateLimitSettings,
        retry: &RetrySettings,
        timeout: Duration,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(service, rate),
            retry: RetryPolicy::new(retry),
            timeout,
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        self.limiter.service()
    }

    pub async fn call<T, F, Fut>(&self, mut operation: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let limiter = &self.limiter;
        let timeout = self.timeout;
        self.retry
            .run(limiter.service(), || {
                let call = operation();
                async move {
                    limiter.acquire().await?;
                    match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => {
                            #[allow(clippy::cast_possible_truncation)]
                            let timeout_ms = timeout.as_millis() as u64;
                            Err(ServiceError::Timeout { timeout_ms })
                        }
                    }
                }
            })
            .await
    }
}
