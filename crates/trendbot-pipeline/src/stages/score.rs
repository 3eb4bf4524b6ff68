use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use trendbot_core::{
    rank_candidates, score_candidate, Candidate, ScoredCandidate, ScoringSettings, StageName,
    StageOutcome, StageStatus,
};

use super::{elapsed_ms, Stage, StageContext};

/// Result of scoring one batch.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Best-first candidates forwarded to Generate, at most `top_k`.
    pub selected: Vec<ScoredCandidate>,
    /// How many cleared the threshold before the `top_k` cut.
    pub above_threshold: usize,
    pub average_score: Option<f64>,
}

/// Pure in-process scoring. Reads the clock once per batch.
pub struct ScoreStage {
    settings: ScoringSettings,
}

impl ScoreStage {
    #[must_use]
    pub fn new(settings: ScoringSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Stage for ScoreStage {
    type Input = Vec<Candidate>;
    type Output = Ranking;

    fn name(&self) -> StageName {
        StageName::Score
    }

    async fn execute(&self, ctx: &StageContext, input: Vec<Candidate>) -> (Ranking, StageOutcome) {
        let started = Instant::now();
        let now = Utc::now();
        let input_count = input.len();

        let scored: Vec<ScoredCandidate> = input
            .iter()
            .map(|c| score_candidate(c, now, &self.settings))
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let average_score = (!scored.is_empty())
            .then(|| scored.iter().map(|s| s.score).sum::<f64>() / scored.len() as f64);
        let above_threshold = scored
            .iter()
            .filter(|s| s.score >= ctx.params.min_score)
            .count();
        let selected = rank_candidates(scored, ctx.params.min_score, ctx.params.top_k);

        for s in &selected {
            tracing::debug!(
                source_id = s.source_id(),
                score = s.score,
                velocity = s.breakdown.upvote_velocity,
                comment_ratio = s.breakdown.comment_ratio,
                recency = s.breakdown.recency_factor,
                "candidate selected"
            );
        }
        tracing::info!(
            run_id = ?ctx.run_id,
            scored = input_count,
            above_threshold,
            selected = selected.len(),
            min_score = ctx.params.min_score,
            "scoring finished"
        );

        let outcome = StageOutcome {
            stage: StageName::Score,
            status: if selected.is_empty() {
                StageStatus::Skipped
            } else {
                StageStatus::Success
            },
            error: None,
            retries: 0,
            duration_ms: elapsed_ms(started),
            input_count,
            output_count: selected.len(),
            items: Vec::new(),
        };
        (
            Ranking {
                selected,
                above_threshold,
                average_score,
            },
            outcome,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::settings::RunParameters;
    use crate::stages::StopFlag;

    fn candidate(id: &str, score: i64, comments: i64, age_hours: i64) -> Candidate {
        let now = Utc::now();
        Candidate {
            source_id: id.to_owned(),
            title: format!("post {id}"),
            body: String::new(),
            community: "technology".to_owned(),
            permalink: format!("/r/technology/comments/{id}"),
            score,
            comment_count: comments,
            created_at: now - Duration::hours(age_hours),
            fetched_at: now,
        }
    }

    fn ctx(min_score: f64, top_k: usize) -> StageContext {
        StageContext {
            run_id: None,
            params: RunParameters {
                communities: vec!["technology".to_owned()],
                min_score,
                top_k,
            },
            stop: StopFlag::new(),
        }
    }

    #[tokio::test]
    async fn threshold_and_top_k_bound_the_selection() {
        let stage = ScoreStage::new(ScoringSettings::default());
        let input = vec![
            candidate("a", 5_000, 100, 1),
            candidate("b", 4_000, 100, 1),
            candidate("c", 3_000, 100, 1),
            candidate("d", 0, 0, 200),
        ];
        let (ranking, outcome) = stage.execute(&ctx(50.0, 2), input).await;

        assert_eq!(ranking.above_threshold, 3);
        let ids: Vec<&str> = ranking.selected.iter().map(ScoredCandidate::source_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.input_count, 4);
        assert_eq!(outcome.output_count, 2);
        assert!(ranking.average_score.is_some());
    }

    #[tokio::test]
    async fn nothing_above_threshold_is_skipped_not_failed() {
        let stage = ScoreStage::new(ScoringSettings::default());
        let (ranking, outcome) = stage
            .execute(&ctx(1_000_000.0, 5), vec![candidate("a", 10, 1, 5)])
            .await;
        assert!(ranking.selected.is_empty());
        assert_eq!(outcome.status, StageStatus::Skipped);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn empty_input_has_no_average() {
        let stage = ScoreStage::new(ScoringSettings::default());
        let (ranking, _) = stage.execute(&ctx(0.0, 5), Vec::new()).await;
        assert!(ranking.average_score.is_none());
        assert_eq!(ranking.above_threshold, 0);
    }
}
