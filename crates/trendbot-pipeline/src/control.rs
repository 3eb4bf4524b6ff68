//! Read-mostly facade over the orchestrator and scheduler, shaped for an
//! outer API or operator tooling.

use std::time::Duration;

use chrono::Utc;
use trendbot_core::{RunOverrides, StageOutcome, WorkflowRun};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::orchestrator::Orchestrator;
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::stats::{compute_stats, AggregateStats};

#[derive(Clone)]
pub struct ControlPlane {
    orchestrator: Orchestrator,
    scheduler: Option<Scheduler>,
}

impl ControlPlane {
    #[must_use]
    pub fn new(orchestrator: Orchestrator, scheduler: Option<Scheduler>) -> Self {
        Self {
            orchestrator,
            scheduler,
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// # Errors
    ///
    /// [`PipelineError::RunAlreadyInProgress`] while another run is active.
    pub async fn start_run(&self, overrides: Option<RunOverrides>) -> Result<Uuid, PipelineError> {
        self.orchestrator
            .start_run("manual", overrides.unwrap_or_default())
            .await
    }

    /// # Errors
    ///
    /// [`PipelineError::RunNotFound`] for an unknown ID.
    pub async fn run_status(&self, run_id: Uuid) -> Result<WorkflowRun, PipelineError> {
        self.orchestrator.run_status(run_id).await
    }

    /// # Errors
    ///
    /// [`PipelineError::Store`] if the store cannot be read.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, PipelineError> {
        self.orchestrator.recent_runs(limit).await
    }

    /// # Errors
    ///
    /// [`PipelineError::SchedulerUnavailable`] when running without a scheduler.
    pub async fn scheduler_status(&self) -> Result<SchedulerStatus, PipelineError> {
        match &self.scheduler {
            Some(scheduler) => Ok(scheduler.status().await),
            None => Err(PipelineError::SchedulerUnavailable),
        }
    }

    /// # Errors
    ///
    /// [`PipelineError::SchedulerUnavailable`] when running without a scheduler.
    pub fn set_scheduler_enabled(&self, enabled: bool) -> Result<(), PipelineError> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or(PipelineError::SchedulerUnavailable)?;
        scheduler.set_enabled(enabled);
        Ok(())
    }

    /// Aggregates over the trailing `window`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Store`] if the store cannot be read.
    pub async fn aggregate_stats(&self, window: Duration) -> Result<AggregateStats, PipelineError> {
        let end = Utc::now();
        let span = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let start = end
            .checked_sub_signed(span)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let store = self.orchestrator.store();
        let runs = store.runs_since(start).await?;
        let published = store.published_since(start).await?;
        let snapshots = store.latest_snapshots_since(start).await?;
        Ok(compute_stats(start, end, &runs, &published, &snapshots))
    }

    /// # Errors
    ///
    /// [`PipelineError::ShuttingDown`] during shutdown.
    pub async fn collect_metrics_now(&self) -> Result<StageOutcome, PipelineError> {
        self.orchestrator.collect_metrics_now().await
    }
}
