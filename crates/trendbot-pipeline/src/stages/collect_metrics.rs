use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use trendbot_core::{
    ItemOutcome, MetricSnapshot, PublishedItem, Publisher, RunStore, StageError, StageName,
    StageOutcome, StageStatus,
};

use super::{cancelled_error, elapsed_ms, store_error, Stage, StageContext};
use crate::guard::ServiceGuard;

/// Appends one engagement snapshot per item still inside the retention window.
pub struct CollectMetricsStage {
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn RunStore>,
    guard: ServiceGuard,
    retention: Duration,
    concurrency: usize,
}

impl CollectMetricsStage {
    #[must_use]
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn RunStore>,
        guard: ServiceGuard,
        retention: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            publisher,
            store,
            guard,
            retention,
            concurrency: concurrency.max(1),
        }
    }

    async fn poll_one(
        &self,
        ctx: &StageContext,
        item: &PublishedItem,
    ) -> (ItemOutcome, Option<MetricSnapshot>) {
        let source_id = item.source_id.as_str();
        if ctx.stop.is_stopped() {
            return (ItemOutcome::skipped(source_id, 0, Some(cancelled_error())), None);
        }

        let outcome = self
            .guard
            .call(|| self.publisher.fetch_metrics(&item.external_id))
            .await;
        let counters = match outcome.result {
            Ok(counters) => counters,
            Err(err) => {
                tracing::warn!(
                    source_id,
                    external_id = %item.external_id,
                    attempts = outcome.attempts,
                    error = %err,
                    "metrics fetch failed"
                );
                return (
                    ItemOutcome::failed(source_id, outcome.attempts, StageError::from(&err)),
                    None,
                );
            }
        };

        let snapshot = MetricSnapshot {
            source_id: item.source_id.clone(),
            external_id: item.external_id.clone(),
            counters,
            captured_at: Utc::now(),
        };
        match self.store.append_snapshot(&snapshot).await {
            Ok(()) => (ItemOutcome::succeeded(source_id, outcome.attempts), Some(snapshot)),
            Err(err) => {
                tracing::warn!(source_id, error = %err, "failed to store metric snapshot");
                (
                    ItemOutcome::failed(source_id, outcome.attempts, store_error(&err)),
                    None,
                )
            }
        }
    }
}

#[async_trait]
impl Stage for CollectMetricsStage {
    type Input = ();
    type Output = Vec<MetricSnapshot>;

    fn name(&self) -> StageName {
        StageName::CollectMetrics
    }

    async fn execute(&self, ctx: &StageContext, (): ()) -> (Vec<MetricSnapshot>, StageOutcome) {
        let started = Instant::now();
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let since = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let tracked = match self.store.published_since(since).await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!(error = %err, "could not load published items");
                let mut outcome = StageOutcome::from_items(
                    StageName::CollectMetrics,
                    0,
                    0,
                    Vec::new(),
                    elapsed_ms(started),
                );
                outcome.status = StageStatus::Failed;
                outcome.error = Some(store_error(&err));
                return (Vec::new(), outcome);
            }
        };

        let polls: Vec<_> = tracked.iter().map(|item| self.poll_one(ctx, item)).collect();
        let results: Vec<(ItemOutcome, Option<MetricSnapshot>)> = stream::iter(polls)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut items = Vec::with_capacity(results.len());
        let mut snapshots = Vec::with_capacity(results.len());
        for (item, snapshot) in results {
            items.push(item);
            snapshots.extend(snapshot);
        }

        tracing::info!(
            run_id = ?ctx.run_id,
            tracked = tracked.len(),
            collected = snapshots.len(),
            "metrics collection finished"
        );
        let outcome = StageOutcome::from_items(
            StageName::CollectMetrics,
            tracked.len(),
            snapshots.len(),
            items,
            elapsed_ms(started),
        );
        (snapshots, outcome)
    }
}
