//! Integration tests for `RedditSource` using wiremock HTTP mocks.

use std::time::Duration;

use trendbot_core::{ContentSource, ErrorClass, ServiceError};
use trendbot_sources::RedditSource;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_source(server: &MockServer) -> RedditSource {
    RedditSource::with_base_urls(
        "client-id",
        "client-secret",
        "trendbot-test/0.1",
        Duration::from_secs(5),
        &server.uri(),
        &server.uri(),
    )
    .expect("client construction should not fail")
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-123",
            "token_type": "bearer",
            "expires_in": 86400
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn listing() -> serde_json::Value {
    serde_json::json!({
        "kind": "Listing",
        "data": {
            "after": null,
            "children": [
                {
                    "kind": "t3",
                    "data": {
                        "id": "pinned1",
                        "title": "Community rules",
                        "selftext": "",
                        "subreddit": "technology",
                        "permalink": "/r/technology/comments/pinned1/rules/",
                        "score": 5000,
                        "num_comments": 10,
                        "created_utc": 1714560000.0,
                        "stickied": true
                    }
                },
                {
                    "kind": "t3",
                    "data": {
                        "id": "abc123",
                        "title": "New chip doubles battery life",
                        "selftext": "Details inside",
                        "subreddit": "technology",
                        "permalink": "/r/technology/comments/abc123/new_chip/",
                        "score": 1200,
                        "num_comments": 340,
                        "created_utc": 1714563600.0,
                        "stickied": false
                    }
                }
            ]
        }
    })
}

#[tokio::test]
async fn fetch_returns_non_stickied_posts() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/technology/hot"))
        .and(query_param("limit", "25"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let source = test_source(&server);
    let candidates = source.fetch("technology", 25).await.expect("should parse");

    assert_eq!(candidates.len(), 1);
    let c = &candidates[0];
    assert_eq!(c.source_id, "abc123");
    assert_eq!(c.score, 1200);
    assert_eq!(c.comment_count, 340);
    assert_eq!(c.community, "technology");
    assert_eq!(c.body, "Details inside");
    assert_eq!(c.created_at.timestamp(), 1_714_563_600);
}

#[tokio::test]
async fn token_is_cached_across_fetches() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/technology/hot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(2)
        .mount(&server)
        .await;

    let source = test_source(&server);
    source.fetch("technology", 10).await.unwrap();
    source.fetch("technology", 10).await.unwrap();
}

#[tokio::test]
async fn missing_subreddit_is_invalid_community() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/doesnotexist/hot"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = test_source(&server)
        .fetch("doesnotexist", 10)
        .await
        .expect_err("404 must fail");
    assert!(matches!(err, ServiceError::InvalidCommunity(_)), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::Permanent);
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/technology/hot"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = test_source(&server)
        .fetch("technology", 10)
        .await
        .expect_err("503 must fail");
    assert_eq!(err.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn throttling_carries_reset_delay() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/r/technology/hot"))
        .respond_with(ResponseTemplate::new(429).insert_header("x-ratelimit-reset", "12"))
        .mount(&server)
        .await;

    let err = test_source(&server)
        .fetch("technology", 10)
        .await
        .expect_err("429 must fail");
    assert_eq!(err.class(), ErrorClass::RateLimited);
    assert_eq!(err.retry_after_ms(), Some(12_000));
}

#[tokio::test]
async fn bad_credentials_are_misconfiguration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = test_source(&server)
        .fetch("technology", 10)
        .await
        .expect_err("token exchange must fail");
    assert!(matches!(err, ServiceError::Misconfigured(_)), "got {err:?}");
    assert!(!err.to_string().contains("client-secret"));
}

#[tokio::test]
async fn invalid_name_fails_without_a_request() {
    let server = MockServer::start().await;
    mount_token(&server, 0).await;

    let err = test_source(&server)
        .fetch("not a subreddit", 10)
        .await
        .expect_err("invalid name must fail");
    assert!(matches!(err, ServiceError::InvalidCommunity(_)));
}
