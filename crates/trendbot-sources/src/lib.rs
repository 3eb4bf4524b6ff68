//! HTTP clients implementing the pipeline's collaborator traits.
//!
//! - [`RedditSource`]: [`trendbot_core::ContentSource`] over Reddit hot listings
//! - [`OpenAiGenerator`]: [`trendbot_core::GenerativeText`] over chat completions
//! - [`XPublisher`]: [`trendbot_core::Publisher`] over the X v2 API
//!
//! Every client classifies failures into [`ServiceError`] and keeps
//! credentials and raw bodies out of error messages.

mod http;
mod openai;
mod reddit;
mod twitter;

use std::time::Duration;

use trendbot_core::{AppConfig, ServiceError};

pub use openai::OpenAiGenerator;
pub use reddit::RedditSource;
pub use twitter::XPublisher;

/// Builds a [`RedditSource`] from application config.
///
/// # Errors
///
/// Returns [`ServiceError::Misconfigured`] if Reddit credentials are missing.
pub fn reddit_from_config(config: &AppConfig) -> Result<RedditSource, ServiceError> {
    let (Some(id), Some(secret)) = (&config.reddit_client_id, &config.reddit_client_secret) else {
        return Err(ServiceError::Misconfigured(
            "REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET must be set".to_owned(),
        ));
    };
    RedditSource::new(
        id,
        secret,
        &config.reddit_user_agent,
        Duration::from_secs(config.source_timeout_secs),
    )
}

/// Builds an [`OpenAiGenerator`] from application config.
///
/// # Errors
///
/// Returns [`ServiceError::Misconfigured`] if `OPENAI_API_KEY` is missing.
pub fn openai_from_config(config: &AppConfig) -> Result<OpenAiGenerator, ServiceError> {
    let key = config
        .openai_api_key
        .as_deref()
        .ok_or_else(|| ServiceError::Misconfigured("OPENAI_API_KEY must be set".to_owned()))?;
    OpenAiGenerator::with_base_url(
        key,
        &config.openai_model,
        Duration::from_secs(config.generator_timeout_secs),
        &config.openai_base_url,
    )
}

/// Builds an [`XPublisher`] from application config.
///
/// # Errors
///
/// Returns [`ServiceError::Misconfigured`] if `TWITTER_BEARER_TOKEN` is missing.
pub fn x_from_config(config: &AppConfig) -> Result<XPublisher, ServiceError> {
    let token = config.twitter_bearer_token.as_deref().ok_or_else(|| {
        ServiceError::Misconfigured("TWITTER_BEARER_TOKEN must be set".to_owned())
    })?;
    XPublisher::with_base_url(
        token,
        Duration::from_secs(config.publisher_timeout_secs),
        &config.twitter_base_url,
    )
}
