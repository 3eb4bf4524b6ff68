//! Virality scoring.
//!
//! ```text
//! age_hours       = max(now - created_at, epsilon_hours)
//! upvote_velocity = max(score, 0) / age_hours
//! comment_ratio   = comment_count / max(score, 1)
//! recency_factor  = 0.5 ^ (age_hours / half_life_hours)
//! final_score     = velocity * 0.4 + (ratio * 100) * 0.3 + (recency * 100) * 0.3
//! ```
//!
//! Pure: `now` is always passed in, so identical inputs give identical scores.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::app_config::ScoringSettings;
use crate::candidate::{Candidate, ScoreBreakdown, ScoredCandidate};

const VELOCITY_WEIGHT: f64 = 0.4;
const COMMENT_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.3;

/// Scores one candidate as of `now`.
#[must_use]
pub fn score_candidate(
    candidate: &Candidate,
    now: DateTime<Utc>,
    settings: &ScoringSettings,
) -> ScoredCandidate {
    #[allow(clippy::cast_precision_loss)]
    let raw_age_hours = (now - candidate.created_at).num_milliseconds() as f64 / 3_600_000.0;
    let age_hours = raw_age_hours.max(settings.epsilon_hours);

    // Downvoted posts contribute nothing rather than a negative velocity.
    #[allow(clippy::cast_precision_loss)]
    let upvote_velocity = (candidate.score.max(0) as f64) / age_hours;

    #[allow(clippy::cast_precision_loss)]
    let comment_ratio = (candidate.comment_count.max(0) as f64) / (candidate.score.max(1) as f64);

    let recency_factor = 0.5_f64.powf(age_hours / settings.half_life_hours);

    let score = upvote_velocity * VELOCITY_WEIGHT
        + comment_ratio * 100.0 * COMMENT_WEIGHT
        + recency_factor * 100.0 * RECENCY_WEIGHT;

    ScoredCandidate {
        candidate: candidate.clone(),
        score,
        breakdown: ScoreBreakdown {
            age_hours,
            upvote_velocity,
            comment_ratio,
            recency_factor,
        },
    }
}

/// Drops candidates below `min_score` and keeps the best `top_k`.
///
/// Order is score descending, then earlier `created_at`, then `source_id` so
/// the selection is total and stable across runs.
#[must_use]
pub fn rank_candidates(
    mut scored: Vec<ScoredCandidate>,
    min_score: f64,
    top_k: usize,
) -> Vec<ScoredCandidate> {
    scored.retain(|s| s.score.is_finite() && s.score >= min_score);
    scored.sort_by(compare_ranked);
    scored.truncate(top_k);
    scored
}

fn compare_ranked(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.candidate.created_at.cmp(&b.candidate.created_at))
        .then_with(|| a.candidate.source_id.cmp(&b.candidate.source_id))
}
