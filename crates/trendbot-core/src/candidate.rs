use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered source item. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source-assigned unique ID (e.g. the Reddit fullname suffix).
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub community: String,
    pub permalink: String,
    /// Net upvote score. May be negative for downvoted posts.
    pub score: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Per-term contributions of a virality score, kept for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub age_hours: f64,
    pub upvote_velocity: f64,
    pub comment_ratio: f64,
    pub recency_factor: f64,
}

/// A candidate plus its computed score. Never mutated after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl ScoredCandidate {
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.candidate.source_id
    }
}

/// Text derived from exactly one scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub source_id: String,
    pub text: String,
    pub model: String,
    pub prompt_version: String,
    /// Score of the candidate this text was derived from.
    pub virality_score: f64,
    /// Whether the generator output had to be shortened to fit the content limit.
    pub truncated: bool,
}

/// Generated content that the publisher accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub source_id: String,
    pub external_id: String,
    pub text: String,
    pub model: String,
    pub prompt_version: String,
    pub run_id: uuid::Uuid,
    pub virality_score: f64,
    pub published_at: DateTime<Utc>,
}

/// Engagement counters as reported by the publishing service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    pub likes: i64,
    pub reshares: i64,
    pub replies: i64,
}

impl EngagementCounters {
    /// Likes plus reshares, the engagement figure reported in aggregate stats.
    #[must_use]
    pub fn engagement(&self) -> i64 {
        self.likes.saturating_add(self.reshares)
    }
}

/// One timestamped reading for a published item. Appended, never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub source_id: String,
    pub external_id: String,
    pub counters: EngagementCounters,
    pub captured_at: DateTime<Utc>,
}
