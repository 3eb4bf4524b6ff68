//! Reddit content source (client-credentials OAuth, hot listings).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use trendbot_core::{Candidate, ContentSource, ServiceError};

use crate::http::{build_client, normalise_base_url, status_error, transport_error};

const DEFAULT_AUTH_BASE_URL: &str = "https://www.reddit.com";
const DEFAULT_API_BASE_URL: &str = "https://oauth.reddit.com";
const MAX_LISTING_LIMIT: u32 = 100;
/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Reddit OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3_600
}

/// Reddit listing wrapper.
#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    kind: String,
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    title: Option<String>,
    selftext: Option<String>,
    subreddit: Option<String>,
    permalink: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    created_utc: Option<f64>,
    #[serde(default)]
    stickied: bool,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Reddit API client. The access token is fetched lazily and cached until
/// shortly before it expires; a 401 forces one refresh.
pub struct RedditSource {
    client: Client,
    auth_base_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl RedditSource {
    /// Creates a client pointed at the production Reddit endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be built.
    pub fn new(
        client_id: &str,
        client_secret: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Self::with_base_urls(
            client_id,
            client_secret,
            user_agent,
            timeout,
            DEFAULT_AUTH_BASE_URL,
            DEFAULT_API_BASE_URL,
        )
    }

    /// Creates a client with custom token and API endpoints (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be
    /// built or either base URL is invalid.
    pub fn with_base_urls(
        client_id: &str,
        client_secret: &str,
        user_agent: &str,
        timeout: Duration,
        auth_base_url: &str,
        api_base_url: &str,
    ) -> Result<Self, ServiceError> {
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(ServiceError::Misconfigured(
                "Reddit client id and secret are required".to_owned(),
            ));
        }
        Ok(Self {
            client: build_client(timeout, user_agent)?,
            auth_base_url: normalise_base_url(auth_base_url)?,
            api_base_url: normalise_base_url(api_base_url)?,
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            timeout,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self, force_refresh: bool) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.expires_at {
                    return Ok(token.value.clone());
                }
            }
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, ServiceError> {
        let response = self
            .client
            .post(format!("{}/api/v1/access_token", self.auth_base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                    ServiceError::Misconfigured(format!("Reddit token exchange failed ({status})"))
                }
                _ => status_error("reddit", status, response.headers()),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| ServiceError::Malformed("Reddit token response".to_owned()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn get_listing(
        &self,
        community: &str,
        limit: u32,
        token: &str,
    ) -> Result<reqwest::Response, ServiceError> {
        self.client
            .get(format!("{}/r/{community}/hot", self.api_base_url))
            .bearer_auth(token)
            .query(&[
                ("limit", limit.min(MAX_LISTING_LIMIT).to_string()),
                ("raw_json", "1".to_owned()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))
    }
}

/// Subreddit names are 2-21 chars of ASCII alphanumerics and underscores.
fn validate_community(community: &str) -> Result<(), ServiceError> {
    let valid_len = (2..=21).contains(&community.len());
    let valid_chars = community
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(ServiceError::InvalidCommunity(community.to_owned()))
    }
}

fn to_candidate(child: Child, community: &str, fetched_at: DateTime<Utc>) -> Option<Candidate> {
    if child.kind != "t3" || child.data.stickied {
        return None;
    }
    let post = child.data;
    let title = post
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_owned();
    #[allow(clippy::cast_possible_truncation)]
    let created_at = DateTime::from_timestamp(post.created_utc?.floor() as i64, 0)?;
    let body = match post.selftext.as_deref() {
        Some(text) if text != "[deleted]" && text != "[removed]" => text.trim().to_owned(),
        _ => String::new(),
    };
    let permalink = post
        .permalink
        .map(|p| format!("https://reddit.com{p}"))
        .unwrap_or_default();

    Some(Candidate {
        source_id: post.id,
        title,
        body,
        community: post.subreddit.unwrap_or_else(|| community.to_owned()),
        permalink,
        score: post.score,
        comment_count: post.num_comments,
        created_at,
        fetched_at,
    })
}

#[async_trait]
impl ContentSource for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn fetch(&self, community: &str, limit: u32) -> Result<Vec<Candidate>, ServiceError> {
        validate_community(community)?;

        let token = self.access_token(false).await?;
        let mut response = self.get_listing(community, limit, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(community, "Reddit token rejected, refreshing");
            let token = self.access_token(true).await?;
            response = self.get_listing(community, limit, &token).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                // Banned, private, quarantined or nonexistent subreddits.
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                    ServiceError::InvalidCommunity(format!("{community} ({status})"))
                }
                _ => status_error("reddit", status, response.headers()),
            });
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|_| ServiceError::Malformed(format!("Reddit listing for {community}")))?;

        let fetched_at = Utc::now();
        let candidates: Vec<Candidate> = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| to_candidate(child, community, fetched_at))
            .collect();

        tracing::debug!(community, candidates = candidates.len(), "fetched Reddit listing");
        Ok(candidates)
    }
}
