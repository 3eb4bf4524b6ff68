//! Shared plumbing for the HTTP collaborator clients.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use trendbot_core::ServiceError;

/// Builds a `reqwest::Client` with the per-call timeout baked in.
pub(crate) fn build_client(timeout: Duration, user_agent: &str) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(user_agent)
        .build()
        .map_err(|e| ServiceError::Misconfigured(format!("failed to build HTTP client: {e}")))
}

/// Validates `base_url` and returns it without a trailing slash.
pub(crate) fn normalise_base_url(base_url: &str) -> Result<String, ServiceError> {
    let trimmed = base_url.trim_end_matches('/');
    Url::parse(trimmed)
        .map_err(|e| ServiceError::Misconfigured(format!("invalid base URL '{base_url}': {e}")))?;
    Ok(trimmed.to_owned())
}

/// Maps a transport-level failure. Never includes the request URL, which may
/// carry credentials in query strings.
pub(crate) fn transport_error(err: &reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = timeout.as_millis() as u64;
        ServiceError::Timeout { timeout_ms }
    } else if err.is_decode() {
        ServiceError::Malformed("response body could not be decoded".to_owned())
    } else if err.is_connect() {
        ServiceError::Unavailable("connection failed".to_owned())
    } else {
        ServiceError::Unavailable("request failed".to_owned())
    }
}

/// Default status mapping shared by every client; callers handle their
/// service-specific codes first.
pub(crate) fn status_error(service: &str, status: StatusCode, headers: &HeaderMap) -> ServiceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::QuotaExceeded {
            message: format!("{service} returned {status}"),
            retry_after_ms: retry_after_ms(headers),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ServiceError::Misconfigured(format!("{service} rejected credentials ({status})"))
        }
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            ServiceError::Unavailable(format!("{service} returned {status}"))
        }
        _ => ServiceError::Malformed(format!("{service} returned unexpected status {status}")),
    }
}

/// Reads the delay a service asked for before the next request.
///
/// Understands `Retry-After` (seconds), Reddit's `x-ratelimit-reset` (seconds
/// until reset) and X's `x-rate-limit-reset` (epoch seconds).
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let header_f64 = |name: &str| -> Option<f64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let secs_to_ms = |secs: f64| (secs * 1_000.0).ceil() as u64;

    if let Some(secs) = header_f64(RETRY_AFTER.as_str()) {
        return Some(secs_to_ms(secs));
    }
    if let Some(secs) = header_f64("x-ratelimit-reset") {
        return Some(secs_to_ms(secs));
    }
    if let Some(epoch) = header_f64("x-rate-limit-reset") {
        #[allow(clippy::cast_precision_loss)]
        let now = Utc::now().timestamp() as f64;
        return Some(secs_to_ms((epoch - now).max(0.0)));
    }
    None
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn retry_after_seconds_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_ms(&headers), Some(7_000));
    }

    #[test]
    fn reddit_reset_header_accepts_fractions() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1.5"));
        assert_eq!(retry_after_ms(&headers), Some(1_500));
    }

    #[test]
    fn past_epoch_reset_clamps_to_zero() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1000"));
        assert_eq!(retry_after_ms(&headers), Some(0));
    }

    #[test]
    fn missing_headers_yield_none() {
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn status_mapping_classifies_common_codes() {
        let headers = HeaderMap::new();
        assert!(matches!(
            status_error("svc", StatusCode::TOO_MANY_REQUESTS, &headers),
            ServiceError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            status_error("svc", StatusCode::BAD_GATEWAY, &headers),
            ServiceError::Unavailable(_)
        ));
        assert!(matches!(
            status_error("svc", StatusCode::UNAUTHORIZED, &headers),
            ServiceError::Misconfigured(_)
        ));
        assert!(matches!(
            status_error("svc", StatusCode::IM_A_TEAPOT, &headers),
            ServiceError::Malformed(_)
        ));
    }

    #[test]
    fn invalid_base_url_is_misconfiguration() {
        assert!(matches!(
            normalise_base_url("not a url"),
            Err(ServiceError::Misconfigured(_))
        ));
        assert_eq!(
            normalise_base_url("https://api.example.com/").unwrap(),
            "https://api.example.com"
        );
    }
}
