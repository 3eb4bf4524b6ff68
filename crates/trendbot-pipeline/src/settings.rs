use std::time::Duration;

use trendbot_core::{AppConfig, RateLimitSettings, RetrySettings, RunOverrides, ScoringSettings};

use crate::error::PipelineError;

/// Everything the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub communities: Vec<String>,
    pub fetch_limit: u32,
    pub scoring: ScoringSettings,
    pub content_limit: usize,
    pub max_prompt_chars: usize,
    pub metrics_retention: Duration,
    pub metrics_concurrency: usize,
    pub retry: RetrySettings,
    pub source_timeout: Duration,
    pub generator_timeout: Duration,
    pub publisher_timeout: Duration,
    pub source_rate: RateLimitSettings,
    pub generator_rate: RateLimitSettings,
    pub publisher_rate: RateLimitSettings,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            communities: config.communities.clone(),
            fetch_limit: config.fetch_limit,
            scoring: config.scoring,
            content_limit: config.content_limit,
            max_prompt_chars: config.max_prompt_chars,
            metrics_retention: Duration::from_secs(config.metrics_retention_hours * 3_600),
            metrics_concurrency: config.metrics_concurrency.max(1),
            retry: config.retry,
            source_timeout: Duration::from_secs(config.source_timeout_secs),
            generator_timeout: Duration::from_secs(config.generator_timeout_secs),
            publisher_timeout: Duration::from_secs(config.publisher_timeout_secs),
            source_rate: config.source_rate,
            generator_rate: config.generator_rate,
            publisher_rate: config.publisher_rate,
        }
    }

    /// Applies per-run overrides on top of the configured values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidOverrides`] for a negative threshold,
    /// a zero `top_k` or an empty community list.
    pub fn resolve(&self, overrides: &RunOverrides) -> Result<RunParameters, PipelineError> {
        let min_score = overrides.min_score.unwrap_or(self.scoring.min_score);
        if !min_score.is_finite() || min_score < 0.0 {
            return Err(PipelineError::InvalidOverrides(
                "min_score must be a non-negative number".to_owned(),
            ));
        }
        let top_k = overrides.top_k.unwrap_or(self.scoring.top_k);
        if top_k == 0 {
            return Err(PipelineError::InvalidOverrides(
                "top_k must be positive".to_owned(),
            ));
        }
        let communities: Vec<String> = match &overrides.communities {
            Some(list) => list
                .iter()
                .map(|c| c.trim().to_owned())
                .filter(|c| !c.is_empty())
                .collect(),
            None => self.communities.clone(),
        };
        if communities.is_empty() {
            return Err(PipelineError::InvalidOverrides(
                "at least one community is required".to_owned(),
            ));
        }
        Ok(RunParameters {
            communities,
            min_score,
            top_k,
        })
    }
}

/// Effective per-run values after overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    pub communities: Vec<String>,
    pub min_score: f64,
    pub top_k: usize,
}

#[cfg(test)]
pub(crate) fn test_settings() -> PipelineSettings {
    let rate = RateLimitSettings {
        max_requests: 1_000,
        window_secs: 60,
        min_spacing_ms: 0,
        max_wait_ms: 60_000,
    };
    PipelineSettings {
        communities: vec!["technology".to_owned()],
        fetch_limit: 25,
        scoring: ScoringSettings::default(),
        content_limit: 280,
        max_prompt_chars: 1_200,
        metrics_retention: Duration::from_secs(72 * 3_600),
        metrics_concurrency: 4,
        retry: RetrySettings {
            max_attempts: 3,
            backoff_base_ms: 0,
        },
        source_timeout: Duration::from_secs(5),
        generator_timeout: Duration::from_secs(5),
        publisher_timeout: Duration::from_secs(5),
        source_rate: rate,
        generator_rate: rate,
        publisher_rate: rate,
    }
}
