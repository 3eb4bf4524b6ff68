//! Per-service request budget: fixed window plus minimum spacing.
//!
//! One limiter guards one external service for the whole process. Callers
//! reserve a start time under the lock, then sleep until it outside the lock,
//! so concurrent callers queue up in reservation order and can never exceed
//! the budget. A reservation further out than `max_wait` is refused with
//! [`ServiceError::RateLimitExceeded`] and consumes nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use trendbot_core::{RateLimitSettings, ServiceError};

#[derive(Debug)]
struct LimiterState {
    window_started_at: Option<Instant>,
    count: u32,
    next_allowed: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    service: Arc<str>,
    max_requests: u32,
    window: Duration,
    min_spacing: Duration,
    max_wait: Duration,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(service: &str, settings: &RateLimitSettings) -> Self {
        Self {
            service: Arc::from(service),
            max_requests: settings.max_requests.max(1),
            window: settings.window(),
            min_spacing: settings.min_spacing(),
            max_wait: settings.max_wait(),
            state: Arc::new(Mutex::new(LimiterState {
                window_started_at: None,
                count: 0,
                next_allowed: None,
            })),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Waits until a request may be sent, or fails fast if that would take
    /// longer than the configured maximum wait.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::RateLimitExceeded`] carrying the wait that would
    /// have been required.
    pub async fn acquire(&self) -> Result<(), ServiceError> {
        let now = Instant::now();
        let start_at = {
            let mut state = self.state.lock().await;

            let mut at = state.next_allowed.map_or(now, |next| next.max(now));
            let mut window_start = state.window_started_at.unwrap_or(at);
            let mut count = state.count;

            if at >= window_start + self.window {
                window_start = at;
                count = 0;
            }
            if count >= self.max_requests {
                at = window_start + self.window;
                window_start = at;
                count = 0;
            }

            let wait = at.saturating_duration_since(now);
            if wait > self.max_wait {
                #[allow(clippy::cast_possible_truncation)]
                let retry_after_ms = wait.as_millis() as u64;
                tracing::warn!(
                    service = %self.service,
                    retry_after_ms,
                    "rate limit budget exhausted"
                );
                return Err(ServiceError::RateLimitExceeded {
                    service: self.service.to_string(),
                    retry_after_ms,
                });
            }

            state.window_started_at = Some(window_start);
            state.count = count + 1;
            state.next_allowed = Some(at + self.min_spacing);
            at
        };

        if start_at > now {
            tracing::debug!(
                service = %self.service,
                wait_ms = start_at.duration_since(now).as_millis(),
                "waiting for rate limit slot"
            );
            tokio::time::sleep_until(start_at).await;
        }
        Ok(())
    }
}
