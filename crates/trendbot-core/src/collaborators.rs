//! Narrow contracts for the external services the pipeline drives.
//!
//! Implementations classify every failure into a [`ServiceError`]; the
//! orchestrator never inspects transport details.

use async_trait::async_trait;

use crate::candidate::{Candidate, EngagementCounters};
use crate::error::ServiceError;

/// Discovers candidate posts.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short service name used in logs and limiter errors.
    fn name(&self) -> &str;

    /// Fetches up to `limit` current posts from `community`.
    ///
    /// Fails with `Unavailable` (transient) or `InvalidCommunity` (permanent).
    async fn fetch(&self, community: &str, limit: u32) -> Result<Vec<Candidate>, ServiceError>;
}

/// Produces short-form text from a prompt.
#[async_trait]
pub trait GenerativeText: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier recorded on generated content.
    fn model(&self) -> &str;

    /// Fails with `QuotaExceeded` (rate-limited) or `InvalidPrompt` (permanent).
    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, ServiceError>;
}

/// Publishes text and reports engagement for it.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the service-assigned content ID.
    ///
    /// Fails with `DuplicateContent` (permanent) or `Unavailable` (transient).
    async fn publish(&self, text: &str) -> Result<String, ServiceError>;

    async fn fetch_metrics(&self, external_id: &str) -> Result<EngagementCounters, ServiceError>;
}
