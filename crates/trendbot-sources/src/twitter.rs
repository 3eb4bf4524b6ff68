//! X (Twitter) API v2 publisher: post creation and public engagement metrics.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use trendbot_core::{EngagementCounters, Publisher, ServiceError};

use crate::http::{build_client, normalise_base_url, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://api.twitter.com";
const USER_AGENT: &str = "trendbot/0.1 (publisher)";

#[derive(Debug, Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TweetLookupResponse {
    data: Option<TweetData>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    public_metrics: PublicMetrics,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    retweet_count: i64,
    #[serde(default)]
    quote_count: i64,
    #[serde(default)]
    reply_count: i64,
}

/// Problem-details body returned on 4xx responses.
#[derive(Debug, Deserialize)]
struct Problem {
    detail: Option<String>,
}

/// Posts through the v2 API with an OAuth 2.0 user-context bearer token.
pub struct XPublisher {
    client: Client,
    bearer_token: String,
    base_url: String,
    timeout: Duration,
}

impl XPublisher {
    /// Creates a client pointed at the production X API.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be built.
    pub fn new(bearer_token: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Self::with_base_url(bearer_token, timeout, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the token is empty, the HTTP
    /// client cannot be built, or `base_url` is invalid.
    pub fn with_base_url(
        bearer_token: &str,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, ServiceError> {
        if bearer_token.is_empty() {
            return Err(ServiceError::Misconfigured("X bearer token is required".to_owned()));
        }
        Ok(Self {
            client: build_client(timeout, USER_AGENT)?,
            bearer_token: bearer_token.to_owned(),
            base_url: normalise_base_url(base_url)?,
            timeout,
        })
    }
}

/// X answers a repeated post with 403 and a "duplicate content" detail.
fn is_duplicate(detail: Option<&str>) -> bool {
    detail.is_some_and(|d| d.to_ascii_lowercase().contains("duplicate"))
}

#[async_trait]
impl Publisher for XPublisher {
    fn name(&self) -> &str {
        "x"
    }

    async fn publish(&self, text: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&CreateTweet { text })
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::FORBIDDEN || status == StatusCode::BAD_REQUEST {
                let problem = response.json::<Problem>().await.ok();
                let detail = problem.and_then(|p| p.detail);
                if is_duplicate(detail.as_deref()) {
                    return Err(ServiceError::DuplicateContent);
                }
                return Err(if status == StatusCode::FORBIDDEN {
                    ServiceError::Misconfigured(format!("X refused the post ({status})"))
                } else {
                    ServiceError::InvalidPrompt(format!("X rejected the post text ({status})"))
                });
            }
            return Err(status_error("x", status, response.headers()));
        }

        let created: CreateTweetResponse = response
            .json()
            .await
            .map_err(|_| ServiceError::Malformed("create-post response".to_owned()))?;
        Ok(created.data.id)
    }

    async fn fetch_metrics(&self, external_id: &str) -> Result<EngagementCounters, ServiceError> {
        if external_id.is_empty() || !external_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::Malformed(format!(
                "invalid post id '{external_id}'"
            )));
        }

        let response = self
            .client
            .get(format!("{}/2/tweets/{external_id}", self.base_url))
            .bearer_auth(&self.bearer_token)
            .query(&[("tweet.fields", "public_metrics")])
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("x", status, response.headers()));
        }

        let lookup: TweetLookupResponse = response
            .json()
            .await
            .map_err(|_| ServiceError::Malformed("post lookup response".to_owned()))?;
        // Deleted or protected posts come back as 200 with an `errors` array.
        let data = lookup.data.ok_or_else(|| {
            ServiceError::Malformed(format!("post {external_id} is no longer available"))
        })?;

        let m = data.public_metrics;
        Ok(EngagementCounters {
            likes: m.like_count,
            reshares: m.retweet_count.saturating_add(m.quote_count),
            replies: m.reply_count,
        })
    }
}
