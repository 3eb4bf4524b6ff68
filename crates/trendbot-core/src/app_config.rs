use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Output format for the tracing subscriber installed by the binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Constants of the virality formula plus per-run selection bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringSettings {
    /// Candidates scoring below this are dropped before Generate.
    pub min_score: f64,
    /// Upper bound on candidates forwarded to Generate in one run.
    pub top_k: usize,
    /// Age at which the recency factor has decayed to one half.
    pub half_life_hours: f64,
    /// Floor applied to a candidate's age so brand-new posts don't divide by zero.
    pub epsilon_hours: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            min_score: 50.0,
            top_k: 5,
            half_life_hours: 24.0,
            epsilon_hours: 1.0 / 60.0,
        }
    }
}

/// Uniform retry policy applied to every external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

/// Budget for one external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub min_spacing_ms: u64,
    /// Longest an `acquire` may block before failing with `RateLimitExceeded`.
    pub max_wait_ms: u64,
}

impl RateLimitSettings {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    #[must_use]
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub log_format: LogFormat,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub communities: Vec<String>,
    pub fetch_limit: u32,
    pub interval_minutes: u64,
    pub scheduler_enabled: bool,
    pub scoring: ScoringSettings,
    pub content_limit: usize,
    pub max_prompt_chars: usize,
    pub metrics_retention_hours: u64,
    pub metrics_concurrency: usize,
    pub retry: RetrySettings,
    pub source_timeout_secs: u64,
    pub generator_timeout_secs: u64,
    pub publisher_timeout_secs: u64,
    pub source_rate: RateLimitSettings,
    pub generator_rate: RateLimitSettings,
    pub publisher_rate: RateLimitSettings,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    pub reddit_user_agent: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub twitter_bearer_token: Option<String>,
    pub twitter_base_url: String,
}

impl AppConfig {
    #[must_use]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("communities", &self.communities)
            .field("fetch_limit", &self.fetch_limit)
            .field("interval_minutes", &self.interval_minutes)
            .field("scheduler_enabled", &self.scheduler_enabled)
            .field("scoring", &self.scoring)
            .field("content_limit", &self.content_limit)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .field("metrics_retention_hours", &self.metrics_retention_hours)
            .field("metrics_concurrency", &self.metrics_concurrency)
            .field("retry", &self.retry)
            .field("source_timeout_secs", &self.source_timeout_secs)
            .field("generator_timeout_secs", &self.generator_timeout_secs)
            .field("publisher_timeout_secs", &self.publisher_timeout_secs)
            .field("source_rate", &self.source_rate)
            .field("generator_rate", &self.generator_rate)
            .field("publisher_rate", &self.publisher_rate)
            .field(
                "reddit_client_id",
                &self.reddit_client_id.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "reddit_client_secret",
                &self.reddit_client_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("reddit_user_agent", &self.reddit_user_agent)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field(
                "twitter_bearer_token",
                &self.twitter_bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .field("twitter_base_url", &self.twitter_base_url)
            .finish()
    }
}
