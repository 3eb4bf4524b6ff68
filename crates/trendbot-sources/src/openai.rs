//! OpenAI-compatible chat-completions client used as the generative-text service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use trendbot_core::{GenerativeText, ServiceError};

use crate::http::{build_client, normalise_base_url, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const USER_AGENT: &str = "trendbot/0.1 (content-generation)";
/// Short-form output never needs more than this many completion tokens.
const MAX_TOKENS: u32 = 100;
const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.9;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    /// Creates a client pointed at the production OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be built.
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Self::with_base_url(api_key, model, timeout, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock, or
    /// for OpenAI-compatible gateways).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Misconfigured`] if the key is empty, the HTTP
    /// client cannot be built, or `base_url` is invalid.
    pub fn with_base_url(
        api_key: &str,
        model: &str,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, ServiceError> {
        if api_key.is_empty() {
            return Err(ServiceError::Misconfigured("OpenAI API key is required".to_owned()));
        }
        Ok(Self {
            client: build_client(timeout, USER_AGENT)?,
            api_key: api_key.to_owned(),
            model: model.to_owned(),
            base_url: normalise_base_url(base_url)?,
            timeout,
        })
    }
}

fn system_prompt(max_length: usize) -> String {
    format!(
        "You are a social media expert who creates engaging, authentic posts from viral \
         content. Always stay within the {max_length} character limit."
    )
}

/// Summarises an error body as `type/code` without echoing the prompt back.
async fn describe_rejection(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorEnvelope>().await {
        Ok(envelope) => {
            let kind = envelope.error.kind.unwrap_or_else(|| "unknown".to_owned());
            match envelope.error.code {
                Some(code) => format!("{status}: {kind}/{code}"),
                None => format!("{status}: {kind}"),
            }
        }
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl GenerativeText for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ServiceError::InvalidPrompt("prompt is empty".to_owned()));
        }

        let system = system_prompt(max_length);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    ServiceError::InvalidPrompt(describe_rejection(response).await)
                }
                _ => status_error("openai", status, response.headers()),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|_| ServiceError::Malformed("chat completion response".to_owned()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::Malformed("completion has no choices".to_owned()))?;

        Ok(text.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_the_limit() {
        assert!(system_prompt(280).contains("280 character limit"));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = OpenAiGenerator::new("", "gpt-4o", Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Misconfigured(_)));
    }
}
