use chrono::{DateTime, Utc};
use serde::Serialize;
use trendbot_core::{MetricSnapshot, PublishedItem, RunStatus, WorkflowRun};

/// Rolled-up figures over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub runs_in_progress: usize,
    pub candidates_scraped: u64,
    pub items_published: usize,
    /// Items the publisher or the store refused after generation.
    pub publish_failures: u64,
    /// Items that never got past generation.
    pub generate_failures: u64,
    pub duplicates_skipped: u64,
    /// `published / (published + publish_failures)`, 0 when nothing was attempted.
    pub success_rate: f64,
    pub average_virality_score: Option<f64>,
    /// Mean of likes plus reshares over each item's latest snapshot.
    pub average_engagement: Option<f64>,
    pub average_run_duration_secs: Option<f64>,
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Pure aggregation over rows already filtered to the window.
#[must_use]
pub fn compute_stats(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    runs: &[WorkflowRun],
    published: &[PublishedItem],
    latest_snapshots: &[MetricSnapshot],
) -> AggregateStats {
    let runs_completed = runs
        .iter()
        .filter(|r| r.status == RunStatus::Completed)
        .count();
    let runs_failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
    let candidates_scraped = runs.iter().map(|r| u64::from(r.counters.scraped)).sum();
    let publish_failures: u64 = runs
        .iter()
        .map(|r| u64::from(r.counters.publish_failed))
        .sum();
    let generate_failures: u64 = runs
        .iter()
        .map(|r| u64::from(r.counters.failed.saturating_sub(r.counters.publish_failed)))
        .sum();
    let duplicates_skipped = runs.iter().map(|r| u64::from(r.counters.duplicates)).sum();

    let items_published = published.len();
    let attempted = items_published as u64 + publish_failures;
    #[allow(clippy::cast_precision_loss)]
    let success_rate = if attempted == 0 {
        0.0
    } else {
        items_published as f64 / attempted as f64
    };

    #[allow(clippy::cast_precision_loss)]
    let average_engagement = mean(
        latest_snapshots
            .iter()
            .map(|s| s.counters.engagement() as f64),
    );

    AggregateStats {
        window_start,
        window_end,
        runs_started: runs.len(),
        runs_completed,
        runs_failed,
        runs_in_progress: runs.len() - runs_completed - runs_failed,
        candidates_scraped,
        items_published,
        publish_failures,
        generate_failures,
        duplicates_skipped,
        success_rate,
        average_virality_score: mean(published.iter().map(|p| p.virality_score)),
        average_engagement,
        average_run_duration_secs: mean(
            runs.iter()
                .filter(|r| r.status == RunStatus::Completed)
                .filter_map(WorkflowRun::duration_secs),
        ),
    }
}
