//! Read-only run inspection and stats output.

use chrono::{DateTime, Duration, Utc};
use trendbot_core::{RunStore, WorkflowRun};
use trendbot_pipeline::compute_stats;
use uuid::Uuid;

/// Format an optional timestamp for display, falling back to a dash.
fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(
        || "\u{2014}".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub(crate) fn print_run(run: &WorkflowRun) {
    println!("run {} ({})", run.id, run.trigger);
    println!("  status:    {}", run.status);
    println!("  started:   {}", fmt_time(Some(run.started_at)));
    println!("  ended:     {}", fmt_time(run.ended_at));
    let c = &run.counters;
    println!(
        "  counters:  scraped={} scored={} above_threshold={} generated={} published={} duplicates={} failed={} (publish {})",
        c.scraped, c.scored, c.above_threshold, c.generated, c.published, c.duplicates, c.failed, c.publish_failed
    );
    if let Some(avg) = c.average_score {
        println!("  avg score: {avg:.1}");
    }

    println!("  {:<17}{:<9}{:>6}{:>7}{:>9}{:>10}", "STAGE", "STATUS", "IN", "OUT", "RETRIES", "MS");
    for stage in &run.stages {
        println!(
            "  {:<17}{:<9}{:>6}{:>7}{:>9}{:>10}",
            stage.stage.as_str(),
            format!("{:?}", stage.status).to_lowercase(),
            stage.input_count,
            stage.output_count,
            stage.retries,
            stage.duration_ms
        );
        if let Some(err) = &stage.error {
            println!("      error [{}/{}]: {}", err.class, err.code, err.message);
        }
    }

    if !run.published_source_ids.is_empty() {
        println!("  published: {}", run.published_source_ids.join(", "));
    }
    for note in &run.notes {
        println!("  note: {note}");
    }
}

/// # Errors
///
/// Returns an error if the store query fails.
pub(crate) async fn run_recent(store: &dyn RunStore, limit: usize) -> anyhow::Result<()> {
    let runs = store.list_recent(limit).await?;
    if runs.is_empty() {
        println!("no runs recorded yet; try `run`");
        return Ok(());
    }

    println!(
        "{:<38}{:<20}{:<21}{:>10}{:>8}",
        "ID", "STATUS", "STARTED", "PUBLISHED", "FAILED"
    );
    for run in &runs {
        println!(
            "{:<38}{:<20}{:<21}{:>10}{:>8}",
            run.id,
            run.status.as_str(),
            fmt_time(Some(run.started_at)),
            run.counters.published,
            run.counters.failed
        );
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the query fails or the run does not exist.
pub(crate) async fn run_show(store: &dyn RunStore, id: Uuid) -> anyhow::Result<()> {
    let run = store
        .get_run(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("run {id} not found"))?;
    print_run(&run);
    Ok(())
}

/// # Errors
///
/// Returns an error if any store query fails.
pub(crate) async fn run_stats(store: &dyn RunStore, hours: u64, json: bool) -> anyhow::Result<()> {
    let end = Utc::now();
    let start = end - Duration::hours(i64::try_from(hours).unwrap_or(i64::MAX).min(24 * 365));
    let runs = store.runs_since(start).await?;
    let published = store.published_since(start).await?;
    let snapshots = store.latest_snapshots_since(start).await?;
    let stats = compute_stats(start, end, &runs, &published, &snapshots);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let fmt_opt = |v: Option<f64>| v.map_or_else(|| "\u{2014}".to_string(), |v| format!("{v:.2}"));
    println!("last {hours}h");
    println!(
        "  runs:         {} started, {} completed, {} failed, {} in progress",
        stats.runs_started, stats.runs_completed, stats.runs_failed, stats.runs_in_progress
    );
    println!("  scraped:      {}", stats.candidates_scraped);
    println!(
        "  published:    {} ({} failed, {} duplicates)",
        stats.items_published, stats.publish_failures, stats.duplicates_skipped
    );
    println!("  gen failures: {}", stats.generate_failures);
    println!("  success rate: {:.1}%", stats.success_rate * 100.0);
    println!("  avg virality: {}", fmt_opt(stats.average_virality_score));
    println!("  avg engagement: {}", fmt_opt(stats.average_engagement));
    println!("  avg duration: {}s", fmt_opt(stats.average_run_duration_secs));
    Ok(())
}
