use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;

use crate::app_config::{
    AppConfig, Environment, LogFormat, RateLimitSettings, RetrySettings, ScoringSettings,
};
use crate::ConfigError;

const DEFAULT_COMMUNITIES: &str = "interestingasfuck,technology,pics";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// All parsing and validation lives here so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("TRENDBOT_ENV", "development"));
    let log_level = or_default("TRENDBOT_LOG_LEVEL", "info");
    let log_format = parse_log_format(&or_default("TRENDBOT_LOG_FORMAT", "text"))?;

    let db_max_connections = parse_or(&lookup, "TRENDBOT_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_or(&lookup, "TRENDBOT_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_or(&lookup, "TRENDBOT_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let communities = parse_list(&or_default("TRENDBOT_COMMUNITIES", DEFAULT_COMMUNITIES));
    if communities.is_empty() {
        return Err(invalid("TRENDBOT_COMMUNITIES", "at least one community is required"));
    }
    let fetch_limit: u32 = parse_or(&lookup, "TRENDBOT_FETCH_LIMIT", "25")?;
    let interval_minutes: u64 = parse_or(&lookup, "TRENDBOT_INTERVAL_MINUTES", "5")?;
    if interval_minutes == 0 {
        return Err(invalid("TRENDBOT_INTERVAL_MINUTES", "must be positive"));
    }
    let scheduler_enabled = parse_or(&lookup, "TRENDBOT_SCHEDULER_ENABLED", "true")?;

    let scoring = ScoringSettings {
        min_score: parse_or(&lookup, "TRENDBOT_MIN_SCORE", "50.0")?,
        top_k: parse_or(&lookup, "TRENDBOT_TOP_K", "5")?,
        half_life_hours: parse_or(&lookup, "TRENDBOT_HALF_LIFE_HOURS", "24.0")?,
        epsilon_hours: lookup("TRENDBOT_EPSILON_HOURS")
            .ok()
            .map(|raw| parse_value("TRENDBOT_EPSILON_HOURS", &raw))
            .transpose()?
            .unwrap_or(ScoringSettings::default().epsilon_hours),
    };
    validate_scoring(&scoring)?;

    let content_limit: usize = parse_or(&lookup, "TRENDBOT_CONTENT_LIMIT", "280")?;
    if content_limit == 0 {
        return Err(invalid("TRENDBOT_CONTENT_LIMIT", "must be positive"));
    }
    let max_prompt_chars = parse_or(&lookup, "TRENDBOT_MAX_PROMPT_CHARS", "1200")?;
    let metrics_retention_hours = parse_or(&lookup, "TRENDBOT_METRICS_RETENTION_HOURS", "72")?;
    let metrics_concurrency = parse_or(&lookup, "TRENDBOT_METRICS_CONCURRENCY", "4")?;

    let retry = RetrySettings {
        max_attempts: parse_or(&lookup, "TRENDBOT_MAX_ATTEMPTS", "3")?,
        backoff_base_ms: parse_or(&lookup, "TRENDBOT_BACKOFF_BASE_MS", "1000")?,
    };
    if retry.max_attempts == 0 {
        return Err(invalid("TRENDBOT_MAX_ATTEMPTS", "must be at least 1"));
    }

    let source_timeout_secs = parse_or(&lookup, "TRENDBOT_SOURCE_TIMEOUT_SECS", "30")?;
    let generator_timeout_secs = parse_or(&lookup, "TRENDBOT_GENERATOR_TIMEOUT_SECS", "60")?;
    let publisher_timeout_secs = parse_or(&lookup, "TRENDBOT_PUBLISHER_TIMEOUT_SECS", "30")?;

    let max_wait_ms: u64 = parse_or(&lookup, "TRENDBOT_RATE_MAX_WAIT_MS", "30000")?;
    let source_rate = rate_settings(&lookup, "SOURCE", (60, 60, 500), max_wait_ms)?;
    let generator_rate = rate_settings(&lookup, "GENERATOR", (20, 60, 0), max_wait_ms)?;
    let publisher_rate = rate_settings(&lookup, "PUBLISHER", (300, 900, 3000), max_wait_ms)?;

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        log_format,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        communities,
        fetch_limit,
        interval_minutes,
        scheduler_enabled,
        scoring,
        content_limit,
        max_prompt_chars,
        metrics_retention_hours,
        metrics_concurrency,
        retry,
        source_timeout_secs,
        generator_timeout_secs,
        publisher_timeout_secs,
        source_rate,
        generator_rate,
        publisher_rate,
        reddit_client_id: lookup("REDDIT_CLIENT_ID").ok(),
        reddit_client_secret: lookup("REDDIT_CLIENT_SECRET").ok(),
        reddit_user_agent: or_default("REDDIT_USER_AGENT", "TrendBot/0.1"),
        openai_api_key: lookup("OPENAI_API_KEY").ok(),
        openai_model: or_default("GPT_MODEL", "gpt-4o"),
        openai_base_url: or_default("OPENAI_BASE_URL", "https://api.openai.com"),
        twitter_bearer_token: lookup("TWITTER_BEARER_TOKEN").ok(),
        twitter_base_url: or_default("TWITTER_BASE_URL", "https://api.twitter.com"),
    })
}

/// Reads `TRENDBOT_{service}_RATE_MAX`, `_RATE_WINDOW_SECS` and `_MIN_SPACING_MS`.
fn rate_settings<F>(
    lookup: &F,
    service: &str,
    defaults: (u32, u64, u64),
    max_wait_ms: u64,
) -> Result<RateLimitSettings, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let max_var = format!("TRENDBOT_{service}_RATE_MAX");
    let window_var = format!("TRENDBOT_{service}_RATE_WINDOW_SECS");
    let spacing_var = format!("TRENDBOT_{service}_MIN_SPACING_MS");

    let settings = RateLimitSettings {
        max_requests: parse_or(lookup, &max_var, &defaults.0.to_string())?,
        window_secs: parse_or(lookup, &window_var, &defaults.1.to_string())?,
        min_spacing_ms: parse_or(lookup, &spacing_var, &defaults.2.to_string())?,
        max_wait_ms,
    };
    if settings.max_requests == 0 {
        return Err(invalid(&max_var, "must be positive"));
    }
    if settings.window_secs == 0 {
        return Err(invalid(&window_var, "must be positive"));
    }
    Ok(settings)
}

fn validate_scoring(scoring: &ScoringSettings) -> Result<(), ConfigError> {
    if !scoring.min_score.is_finite() || scoring.min_score < 0.0 {
        return Err(invalid("TRENDBOT_MIN_SCORE", "must be a non-negative number"));
    }
    if scoring.top_k == 0 {
        return Err(invalid("TRENDBOT_TOP_K", "must be positive"));
    }
    if !scoring.half_life_hours.is_finite() || scoring.half_life_hours <= 0.0 {
        return Err(invalid("TRENDBOT_HALF_LIFE_HOURS", "must be positive"));
    }
    if !scoring.epsilon_hours.is_finite() || scoring.epsilon_hours <= 0.0 {
        return Err(invalid("TRENDBOT_EPSILON_HOURS", "must be positive"));
    }
    Ok(())
}

fn parse_or<T, F>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    parse_value(var, &raw)
}

fn parse_value<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits a comma-separated list, trimming entries and dropping empties.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

fn parse_log_format(s: &str) -> Result<LogFormat, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(invalid(
            "TRENDBOT_LOG_FORMAT",
            &format!("expected `text` or `json`, got `{other}`"),
        )),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
