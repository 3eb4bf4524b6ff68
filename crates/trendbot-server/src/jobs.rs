//! Auxiliary cron jobs that run beside the interval scheduler.
//!
//! The pipeline itself is triggered by [`trendbot_pipeline::Scheduler`];
//! these jobs only poll engagement and log rolled-up stats.

use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use trendbot_pipeline::ControlPlane;

const STATS_WINDOW: Duration = Duration::from_secs(24 * 3_600);

/// Builds and starts the cron scheduler.
///
/// The returned handle must be kept alive; dropping it stops all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_job_scheduler(control: ControlPlane) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_metrics_job(&scheduler, control.clone()).await?;
    register_stats_job(&scheduler, control).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Polls engagement for recently published items at the top of every hour.
async fn register_metrics_job(
    scheduler: &JobScheduler,
    control: ControlPlane,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let control = control.clone();
        Box::pin(async move {
            tracing::info!("jobs: starting hourly metrics collection");
            match control.collect_metrics_now().await {
                Ok(outcome) => tracing::info!(
                    tracked = outcome.input_count,
                    collected = outcome.output_count,
                    failed = outcome.failed_items(),
                    "jobs: hourly metrics collection complete"
                ),
                Err(e) => tracing::warn!(error = %e, "jobs: metrics collection skipped"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Logs the trailing 24h aggregate every six hours.
async fn register_stats_job(
    scheduler: &JobScheduler,
    control: ControlPlane,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 0 */6 * * *", move |_uuid, _lock| {
        let control = control.clone();
        Box::pin(async move {
            match control.aggregate_stats(STATS_WINDOW).await {
                Ok(stats) => {
                    let summary = serde_json::to_string(&stats).unwrap_or_default();
                    tracing::info!(
                        runs_started = stats.runs_started,
                        items_published = stats.items_published,
                        success_rate = stats.success_rate,
                        %summary,
                        "jobs: 24h stats snapshot"
                    );
                }
                Err(e) => tracing::error!(error = %e, "jobs: failed to compute 24h stats"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
