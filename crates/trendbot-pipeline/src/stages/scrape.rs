use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use trendbot_core::{
    Candidate, ContentSource, ItemOutcome, ItemStatus, RunStore, StageError, StageName,
    StageOutcome, StageStatus, StoreError,
};

use super::{cancelled_error, elapsed_ms, store_error, Stage, StageContext};
use crate::guard::ServiceGuard;

/// Concurrent community fetches; the source limiter still paces the calls.
const MAX_CONCURRENT_COMMUNITIES: usize = 4;

/// Fetches every community, merges the results and drops already-published items.
pub struct ScrapeStage {
    source: Arc<dyn ContentSource>,
    store: Arc<dyn RunStore>,
    guard: ServiceGuard,
    fetch_limit: u32,
}

impl ScrapeStage {
    #[must_use]
    pub fn new(
        source: Arc<dyn ContentSource>,
        store: Arc<dyn RunStore>,
        guard: ServiceGuard,
        fetch_limit: u32,
    ) -> Self {
        Self {
            source,
            store,
            guard,
            fetch_limit,
        }
    }

    async fn fetch_community(
        &self,
        ctx: &StageContext,
        community: &str,
    ) -> (ItemOutcome, Vec<Candidate>) {
        if ctx.stop.is_stopped() {
            return (ItemOutcome::skipped(community, 0, Some(cancelled_error())), Vec::new());
        }
        let outcome = self
            .guard
            .call(|| self.source.fetch(community, self.fetch_limit))
            .await;
        match outcome.result {
            Ok(candidates) => {
                tracing::debug!(
                    community,
                    fetched = candidates.len(),
                    attempts = outcome.attempts,
                    "community fetched"
                );
                (ItemOutcome::succeeded(community, outcome.attempts), candidates)
            }
            Err(err) => {
                tracing::warn!(
                    community,
                    service = self.guard.service(),
                    attempts = outcome.attempts,
                    error = %err,
                    "community fetch failed"
                );
                (
                    ItemOutcome::failed(community, outcome.attempts, StageError::from(&err)),
                    Vec::new(),
                )
            }
        }
    }
}

impl ScrapeStage {
    /// Source IDs already published, and those the publisher refused as duplicates.
    async fn known_source_ids(
        &self,
        ids: &[String],
    ) -> Result<(HashSet<String>, HashSet<String>), StoreError> {
        if ids.is_empty() {
            return Ok((HashSet::new(), HashSet::new()));
        }
        let published = self.store.published_source_ids(ids).await?;
        let rejected = self.store.rejected_source_ids(ids).await?;
        Ok((published, rejected))
    }
}

#[async_trait]
impl Stage for ScrapeStage {
    type Input = ();
    type Output = Vec<Candidate>;

    fn name(&self) -> StageName {
        StageName::Scrape
    }

    async fn execute(&self, ctx: &StageContext, (): ()) -> (Vec<Candidate>, StageOutcome) {
        let started = Instant::now();
        let communities = &ctx.params.communities;

        let fetches: Vec<_> = communities
            .iter()
            .enumerate()
            .map(|(idx, community)| async move {
                let (item, candidates) = self.fetch_community(ctx, community).await;
                (idx, item, candidates)
            })
            .collect();
        let mut results: Vec<(usize, ItemOutcome, Vec<Candidate>)> =
            stream::iter(fetches)
                .buffer_unordered(MAX_CONCURRENT_COMMUNITIES)
                .collect()
                .await;
        // Completion order is arbitrary; merge in configured community order.
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut merged: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut items = Vec::with_capacity(results.len());
        for (_, item, candidates) in results {
            items.push(item);
            for candidate in candidates {
                merged.entry(candidate.source_id.clone()).or_insert(candidate);
            }
        }
        let fetched = merged.len();
        let all_failed = !items.is_empty() && items.iter().all(|i| i.status == ItemStatus::Failed);

        let ids: Vec<String> = merged.keys().cloned().collect();
        let (already_published, rejected) = match self.known_source_ids(&ids).await {
            Ok(known) => known,
            Err(err) => {
                tracing::error!(error = %err, "dedup lookup failed");
                let mut outcome = StageOutcome::from_items(
                    StageName::Scrape,
                    communities.len(),
                    0,
                    items,
                    elapsed_ms(started),
                );
                outcome.status = StageStatus::Failed;
                outcome.error = Some(store_error(&err));
                return (Vec::new(), outcome);
            }
        };

        // BTreeMap iteration yields candidates sorted by source ID.
        let candidates: Vec<Candidate> = merged
            .into_values()
            .filter(|c| {
                !already_published.contains(&c.source_id) && !rejected.contains(&c.source_id)
            })
            .collect();

        tracing::info!(
            run_id = ?ctx.run_id,
            communities = communities.len(),
            fetched,
            already_published = already_published.len(),
            rejected = rejected.len(),
            kept = candidates.len(),
            "scrape finished"
        );

        let mut outcome = StageOutcome::from_items(
            StageName::Scrape,
            communities.len(),
            candidates.len(),
            items,
            elapsed_ms(started),
        );
        // One reachable community is enough; an empty feed is not a failure.
        if all_failed {
            outcome.status = StageStatus::Failed;
        } else if candidates.is_empty() {
            outcome.status = StageStatus::Skipped;
            outcome.error = None;
        }
        (candidates, outcome)
    }
}
