use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use trendbot_core::{
    truncate_at_word_boundary, ErrorClass, GeneratedContent, ItemOutcome, PublishedItem,
    Publisher, RunStore, ServiceError, StageError, StageName, StageOutcome, StoreError,
};
use uuid::Uuid;

use super::{cancelled_error, elapsed_ms, store_error, Stage, StageContext};
use crate::guard::ServiceGuard;

/// Posts generated content and records it together with its dedup entry.
pub struct PublishStage {
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn RunStore>,
    guard: ServiceGuard,
    content_limit: usize,
}

fn duplicate(source_id: &str, attempts: u32) -> ItemOutcome {
    ItemOutcome::skipped(
        source_id,
        attempts,
        Some(StageError::from(&ServiceError::DuplicateContent)),
    )
}

impl PublishStage {
    #[must_use]
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn RunStore>,
        guard: ServiceGuard,
        content_limit: usize,
    ) -> Self {
        Self {
            publisher,
            store,
            guard,
            content_limit,
        }
    }

    async fn publish_one(
        &self,
        run_id: Uuid,
        content: &GeneratedContent,
    ) -> (ItemOutcome, Option<PublishedItem>) {
        let source_id = content.source_id.as_str();

        match self
            .store
            .published_source_ids(std::slice::from_ref(&content.source_id))
            .await
        {
            Ok(seen) if seen.contains(source_id) => {
                tracing::info!(source_id, "already published, skipping");
                return (duplicate(source_id, 0), None);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(source_id, error = %err, "dedup check failed");
                return (ItemOutcome::failed(source_id, 0, store_error(&err)), None);
            }
        }

        let text = content.text.trim();
        if text.is_empty() {
            let err = StageError::new(ErrorClass::Permanent, "empty_content", "nothing to publish");
            return (ItemOutcome::failed(source_id, 0, err), None);
        }
        let text = if text.chars().count() > self.content_limit {
            truncate_at_word_boundary(text, self.content_limit)
        } else {
            text.to_owned()
        };

        let outcome = self.guard.call(|| self.publisher.publish(&text)).await;
        let external_id = match outcome.result {
            Ok(id) => id,
            Err(ServiceError::DuplicateContent) => {
                tracing::info!(source_id, "publisher rejected duplicate content");
                if let Err(err) = self.store.record_rejected(source_id, run_id).await {
                    tracing::warn!(source_id, error = %err, "failed to remember rejected source");
                }
                return (duplicate(source_id, outcome.attempts), None);
            }
            Err(err) => {
                tracing::warn!(
                    source_id,
                    service = self.guard.service(),
                    attempts = outcome.attempts,
                    class = %err.class(),
                    error = %err,
                    "publish failed"
                );
                return (
                    ItemOutcome::failed(source_id, outcome.attempts, StageError::from(&err)),
                    None,
                );
            }
        };

        let item = PublishedItem {
            source_id: content.source_id.clone(),
            external_id,
            text,
            model: content.model.clone(),
            prompt_version: content.prompt_version.clone(),
            run_id,
            virality_score: content.virality_score,
            published_at: Utc::now(),
        };
        match self.store.record_published(&item).await {
            Ok(()) => {
                tracing::info!(
                    source_id,
                    external_id = %item.external_id,
                    "content published"
                );
                (ItemOutcome::succeeded(source_id, outcome.attempts), Some(item))
            }
            Err(StoreError::AlreadyPublished(_)) => {
                // Raced with another writer; the post is live but the first record wins.
                tracing::warn!(
                    source_id,
                    external_id = %item.external_id,
                    "published but dedup entry already existed"
                );
                (duplicate(source_id, outcome.attempts), None)
            }
            Err(err) => {
                tracing::error!(
                    source_id,
                    external_id = %item.external_id,
                    error = %err,
                    "published but failed to record item"
                );
                (
                    ItemOutcome::failed(source_id, outcome.attempts, store_error(&err)),
                    None,
                )
            }
        }
    }
}

#[async_trait]
impl Stage for PublishStage {
    type Input = Vec<GeneratedContent>;
    type Output = Vec<PublishedItem>;

    fn name(&self) -> StageName {
        StageName::Publish
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        input: Vec<GeneratedContent>,
    ) -> (Vec<PublishedItem>, StageOutcome) {
        let Some(run_id) = ctx.run_id else {
            return (
                Vec::new(),
                StageOutcome::skipped(StageName::Publish, "publishing requires a run"),
            );
        };
        let started = Instant::now();
        let mut items = Vec::with_capacity(input.len());
        let mut published = Vec::with_capacity(input.len());

        for content in &input {
            if ctx.stop.is_stopped() {
                items.push(ItemOutcome::skipped(
                    content.source_id.as_str(),
                    0,
                    Some(cancelled_error()),
                ));
                continue;
            }
            let (item, record) = self.publish_one(run_id, content).await;
            items.push(item);
            published.extend(record);
        }

        tracing::info!(
            %run_id,
            requested = input.len(),
            published = published.len(),
            "publish finished"
        );
        let outcome = StageOutcome::from_items(
            StageName::Publish,
            input.len(),
            published.len(),
            items,
            elapsed_ms(started),
        );
        (published, outcome)
    }
}

/// Items skipped because the content was already out there.
#[must_use]
pub(crate) fn duplicate_count(outcome: &StageOutcome) -> usize {
    let code = ServiceError::DuplicateContent.code();
    outcome
        .items
        .iter()
        .filter(|i| i.error.as_ref().is_some_and(|e| e.code == code))
        .count()
}
