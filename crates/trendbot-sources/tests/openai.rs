//! Integration tests for `OpenAiGenerator` using wiremock HTTP mocks.

use std::time::Duration;

use trendbot_core::{ErrorClass, GenerativeText, ServiceError};
use trendbot_sources::OpenAiGenerator;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_generator(server: &MockServer) -> OpenAiGenerator {
    OpenAiGenerator::with_base_url("sk-test", "gpt-4o", Duration::from_secs(5), &server.uri())
        .expect("client construction should not fail")
}

#[tokio::test]
async fn generate_returns_trimmed_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "max_tokens": 100
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "  Battery life, doubled. #tech  " } }
            ]
        })))
        .mount(&server)
        .await;

    let generator = test_generator(&server);
    let text = generator
        .generate("Write a post about a new chip", 280)
        .await
        .expect("should parse completion");
    assert_eq!(text, "Battery life, doubled. #tech");
    assert_eq!(generator.model(), "gpt-4o");
}

#[tokio::test]
async fn quota_errors_are_rate_limited_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    let err = test_generator(&server)
        .generate("prompt", 280)
        .await
        .expect_err("429 must fail");
    assert!(matches!(err, ServiceError::QuotaExceeded { .. }), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::RateLimited);
    assert_eq!(err.retry_after_ms(), Some(3_000));
}

#[tokio::test]
async fn rejected_prompt_is_permanent_and_summarised() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "message": "This prompt echoes user text that should not be logged",
                "type": "invalid_request_error",
                "code": "content_filter"
            }
        })))
        .mount(&server)
        .await;

    let err = test_generator(&server)
        .generate("prompt", 280)
        .await
        .expect_err("400 must fail");
    assert!(matches!(err, ServiceError::InvalidPrompt(_)), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::Permanent);
    let msg = err.to_string();
    assert!(msg.contains("invalid_request_error/content_filter"), "{msg}");
    assert!(!msg.contains("echoes user text"));
}

#[tokio::test]
async fn empty_choices_are_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = test_generator(&server)
        .generate("prompt", 280)
        .await
        .expect_err("no choices must fail");
    assert!(matches!(err, ServiceError::Malformed(_)));
}

#[tokio::test]
async fn slow_response_times_out_as_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::with_base_url(
        "sk-test",
        "gpt-4o",
        Duration::from_millis(50),
        &server.uri(),
    )
    .unwrap();
    let err = generator
        .generate("prompt", 280)
        .await
        .expect_err("must time out");
    assert!(matches!(err, ServiceError::Timeout { timeout_ms: 50 }), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::Transient);
}
