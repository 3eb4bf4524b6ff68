use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use trendbot_core::{
    truncate_at_word_boundary, ErrorClass, GeneratedContent, GenerativeText, ItemOutcome,
    ScoredCandidate, StageError, StageName, StageOutcome,
};

use super::{cancelled_error, elapsed_ms, Stage, StageContext};
use crate::guard::ServiceGuard;

/// Recorded on every [`GeneratedContent`]; bump when the template changes.
pub const PROMPT_VERSION: &str = "v1";

const MAX_HASHTAGS: usize = 3;

/// Renders the generation prompt for one candidate, bounded to `max_chars`.
///
/// Only the title is shortened to make room; the instructions always survive
/// unless `max_chars` cannot hold them at all.
#[must_use]
pub fn build_prompt(scored: &ScoredCandidate, content_limit: usize, max_chars: usize) -> String {
    let render = |title: &str| {
        let c = &scored.candidate;
        format!(
            "Write one post for a general audience based on this trending Reddit thread.\n\
             \n\
             Title: {title}\n\
             Community: r/{community}\n\
             Upvotes: {score}\n\
             Comments: {comments}\n\
             Link: {link}\n\
             \n\
             Rules:\n\
             - At most {content_limit} characters in total.\n\
             - Say what made the thread take off.\n\
             - Use 1 to {MAX_HASHTAGS} relevant hashtags.\n\
             - Include the link only if it adds value, and no other URLs.\n\
             - No clickbait and no emoji spam.\n\
             \n\
             Reply with the post text only.",
            community = c.community,
            score = c.score,
            comments = c.comment_count,
            link = c.permalink,
        )
    };

    let title = scored.candidate.title.trim();
    let full = render(title);
    let full_len = full.chars().count();
    if full_len <= max_chars {
        return full;
    }

    let fixed = full_len - title.chars().count();
    let prompt = render(&truncate_at_word_boundary(title, max_chars.saturating_sub(fixed)));
    if prompt.chars().count() <= max_chars {
        prompt
    } else {
        truncate_at_word_boundary(&prompt, max_chars)
    }
}

/// Warnings for output that is publishable but off-brief.
fn review_output(text: &str) -> Vec<&'static str> {
    let mut issues = Vec::new();
    if text.matches('#').count() > MAX_HASHTAGS {
        issues.push("too many hashtags");
    }
    if text.matches("http").count() > 1 {
        issues.push("multiple urls");
    }
    issues
}

/// Turns each selected candidate into publishable text.
pub struct GenerateStage {
    generator: Arc<dyn GenerativeText>,
    guard: ServiceGuard,
    content_limit: usize,
    max_prompt_chars: usize,
}

impl GenerateStage {
    #[must_use]
    pub fn new(
        generator: Arc<dyn GenerativeText>,
        guard: ServiceGuard,
        content_limit: usize,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            generator,
            guard,
            content_limit,
            max_prompt_chars,
        }
    }

    async fn generate_one(
        &self,
        scored: &ScoredCandidate,
    ) -> (ItemOutcome, Option<GeneratedContent>) {
        let source_id = scored.source_id();
        let prompt = build_prompt(scored, self.content_limit, self.max_prompt_chars);
        let outcome = self
            .guard
            .call(|| self.generator.generate(&prompt, self.content_limit))
            .await;

        let raw = match outcome.result {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    source_id,
                    service = self.guard.service(),
                    attempts = outcome.attempts,
                    class = %err.class(),
                    error = %err,
                    "generation failed"
                );
                return (
                    ItemOutcome::failed(source_id, outcome.attempts, StageError::from(&err)),
                    None,
                );
            }
        };

        let text = raw.trim();
        if text.is_empty() {
            tracing::warn!(source_id, "generator returned empty text");
            let err = StageError::new(
                ErrorClass::Permanent,
                "empty_output",
                "generator returned empty text",
            );
            return (ItemOutcome::failed(source_id, outcome.attempts, err), None);
        }

        let truncated = text.chars().count() > self.content_limit;
        let text = if truncated {
            tracing::info!(
                source_id,
                length = text.chars().count(),
                limit = self.content_limit,
                "generated text over limit, truncating at word boundary"
            );
            truncate_at_word_boundary(text, self.content_limit)
        } else {
            text.to_owned()
        };

        for issue in review_output(&text) {
            tracing::warn!(source_id, issue, "generated text flagged");
        }

        let content = GeneratedContent {
            source_id: source_id.to_owned(),
            text,
            model: self.generator.model().to_owned(),
            prompt_version: PROMPT_VERSION.to_owned(),
            virality_score: scored.score,
            truncated,
        };
        (ItemOutcome::succeeded(source_id, outcome.attempts), Some(content))
    }
}

#[async_trait]
impl Stage for GenerateStage {
    type Input = Vec<ScoredCandidate>;
    type Output = Vec<GeneratedContent>;

    fn name(&self) -> StageName {
        StageName::Generate
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        input: Vec<ScoredCandidate>,
    ) -> (Vec<GeneratedContent>, StageOutcome) {
        let started = Instant::now();
        let mut items = Vec::with_capacity(input.len());
        let mut generated = Vec::with_capacity(input.len());

        for scored in &input {
            if ctx.stop.is_stopped() {
                items.push(ItemOutcome::skipped(
                    scored.source_id(),
                    0,
                    Some(cancelled_error()),
                ));
                continue;
            }
            let (item, content) = self.generate_one(scored).await;
            items.push(item);
            generated.extend(content);
        }

        tracing::info!(
            run_id = ?ctx.run_id,
            requested = input.len(),
            generated = generated.len(),
            "generation finished"
        );
        let outcome = StageOutcome::from_items(
            StageName::Generate,
            input.len(),
            generated.len(),
            items,
            elapsed_ms(started),
        );
        (generated, outcome)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use trendbot_core::{Candidate, ScoreBreakdown};

    use super::*;

    fn scored(title: &str) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                source_id: "abc".to_owned(),
                title: title.to_owned(),
                body: String::new(),
                community: "technology".to_owned(),
                permalink: "https://reddit.com/r/technology/comments/abc/".to_owned(),
                score: 1_200,
                comment_count: 340,
                created_at: Utc::now(),
                fetched_at: Utc::now(),
            },
            score: 88.0,
            breakdown: ScoreBreakdown {
                age_hours: 1.0,
                upvote_velocity: 1_200.0,
                comment_ratio: 0.28,
                recency_factor: 0.97,
            },
        }
    }

    #[test]
    fn prompt_carries_candidate_details_and_limit() {
        let prompt = build_prompt(&scored("New chip doubles battery life"), 280, 2_000);
        assert!(prompt.contains("Title: New chip doubles battery life"));
        assert!(prompt.contains("r/technology"));
        assert!(prompt.contains("Upvotes: 1200"));
        assert!(prompt.contains("Comments: 340"));
        assert!(prompt.contains("https://reddit.com/r/technology/comments/abc/"));
        assert!(prompt.contains("At most 280 characters"));
    }

    #[test]
    fn long_titles_are_shortened_to_fit_the_bound() {
        let title = "word ".repeat(500);
        let prompt = build_prompt(&scored(&title), 280, 800);
        assert!(prompt.chars().count() <= 800);
        assert!(prompt.contains("Rules:"));
        assert!(prompt.contains("..."));
    }

    #[test]
    fn tiny_bound_still_holds() {
        let prompt = build_prompt(&scored("title"), 280, 40);
        assert!(prompt.chars().count() <= 40);
    }

    #[test]
    fn review_flags_hashtag_and_url_spam() {
        assert!(review_output("Big news #tech #ai").is_empty());
        assert_eq!(
            review_output("#a #b #c #d http://x http://y"),
            vec!["too many hashtags", "multiple urls"]
        );
    }
}
