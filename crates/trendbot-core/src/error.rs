use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the orchestrator reacts to a failed external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retry with exponential backoff (network blips, 5xx, timeouts).
    Transient,
    /// Retry after the delay the service or limiter asked for.
    RateLimited,
    /// Abort the item or stage; retrying cannot help.
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::RateLimited => write!(f, "rate_limited"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure reported by a collaborator or by the rate limiter guarding it.
///
/// Messages are short human-readable summaries: status codes and reasons,
/// never credentials or raw response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("rate limit budget for {service} exhausted (retry after {retry_after_ms} ms)")]
    RateLimitExceeded {
        service: String,
        retry_after_ms: u64,
    },

    #[error("invalid community: {0}")]
    InvalidCommunity(String),

    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("duplicate content")]
    DuplicateContent,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("misconfigured client: {0}")]
    Misconfigured(String),
}

impl ServiceError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Timeout { .. } => ErrorClass::Transient,
            ServiceError::QuotaExceeded { .. } | ServiceError::RateLimitExceeded { .. } => {
                ErrorClass::RateLimited
            }
            ServiceError::InvalidCommunity(_)
            | ServiceError::InvalidPrompt(_)
            | ServiceError::DuplicateContent
            | ServiceError::Malformed(_)
            | ServiceError::Misconfigured(_) => ErrorClass::Permanent,
        }
    }

    /// Delay requested by the service or limiter before the next attempt.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ServiceError::QuotaExceeded { retry_after_ms, .. } => *retry_after_ms,
            ServiceError::RateLimitExceeded { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Stable machine-readable code recorded in stage outcomes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::QuotaExceeded { .. } => "quota_exceeded",
            ServiceError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ServiceError::InvalidCommunity(_) => "invalid_community",
            ServiceError::InvalidPrompt(_) => "invalid_prompt",
            ServiceError::DuplicateContent => "duplicate_content",
            ServiceError::Malformed(_) => "malformed_response",
            ServiceError::Misconfigured(_) => "misconfigured",
        }
    }
}
