//! Drives one [`WorkflowRun`] through the fixed stage sequence.
//!
//! Every transition is persisted before the next stage starts. At most one
//! run is non-terminal at a time: the claim is serialized in-process and the
//! store rejects a second active run as well.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use trendbot_core::{
    ContentSource, GenerativeText, Publisher, RunOverrides, RunStatus, RunStore, ServiceError,
    StageOutcome, StageStatus, StoreError, WorkflowRun,
};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::guard::ServiceGuard;
use crate::retry::RetryPolicy;
use crate::scheduler::RunTrigger;
use crate::settings::{PipelineSettings, RunParameters};
use crate::stages::{
    duplicate_count, CollectMetricsStage, GenerateStage, PublishStage, ScoreStage, ScrapeStage,
    Stage, StageContext, StopFlag, CANCELLED,
};

/// The three external services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ContentSource>,
    pub generator: Arc<dyn GenerativeText>,
    pub publisher: Arc<dyn Publisher>,
}

/// How a run ends once the stages stop.
enum Finish {
    Completed(Option<String>),
    Failed(String),
}

struct Inner {
    store: Arc<dyn RunStore>,
    settings: PipelineSettings,
    scrape: ScrapeStage,
    score: ScoreStage,
    generate: GenerateStage,
    publish: PublishStage,
    collect: CollectMetricsStage,
    active: Mutex<Option<Uuid>>,
    /// Final state of the active run when the store refused it; the slot
    /// stays claimed until this is saved.
    unsaved: Mutex<Option<WorkflowRun>>,
    persist_retry: RetryPolicy,
    task: Mutex<Option<JoinHandle<WorkflowRun>>>,
    stop: StopFlag,
}

/// Cheap to clone; all clones drive the same single-flight slot.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        collaborators: Collaborators,
        settings: PipelineSettings,
    ) -> Self {
        let retry = settings.retry;
        let source_guard = ServiceGuard::new(
            collaborators.source.name(),
            &settings.source_rate,
            &retry,
            settings.source_timeout,
        );
        let generator_guard = ServiceGuard::new(
            collaborators.generator.name(),
            &settings.generator_rate,
            &retry,
            settings.generator_timeout,
        );
        // Publish and metric polls share one publisher budget.
        let publisher_guard = ServiceGuard::new(
            collaborators.publisher.name(),
            &settings.publisher_rate,
            &retry,
            settings.publisher_timeout,
        );

        let inner = Inner {
            scrape: ScrapeStage::new(
                Arc::clone(&collaborators.source),
                Arc::clone(&store),
                source_guard,
                settings.fetch_limit,
            ),
            score: ScoreStage::new(settings.scoring),
            generate: GenerateStage::new(
                Arc::clone(&collaborators.generator),
                generator_guard,
                settings.content_limit,
                settings.max_prompt_chars,
            ),
            publish: PublishStage::new(
                Arc::clone(&collaborators.publisher),
                Arc::clone(&store),
                publisher_guard.clone(),
                settings.content_limit,
            ),
            collect: CollectMetricsStage::new(
                Arc::clone(&collaborators.publisher),
                Arc::clone(&store),
                publisher_guard,
                settings.metrics_retention,
                settings.metrics_concurrency,
            ),
            store,
            settings,
            active: Mutex::new(None),
            unsaved: Mutex::new(None),
            persist_retry: RetryPolicy::new(&retry),
            task: Mutex::new(None),
            stop: StopFlag::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Marks a run left non-terminal by a previous process as `Failed`.
    ///
    /// Call once at startup, before the scheduler starts. Returns the ID of
    /// the run that was reclassified, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the store cannot be read or written.
    pub async fn recover(&self) -> Result<Option<Uuid>, PipelineError> {
        let active = self.inner.active.lock().await;
        let Some(mut run) = self.inner.store.load_active().await? else {
            return Ok(None);
        };
        if *active == Some(run.id) {
            return Ok(None);
        }
        let was = run.status;
        if let Err(err) = run.mark_interrupted(Utc::now()) {
            tracing::warn!(run_id = %run.id, error = %err, "could not reclassify run");
            return Ok(None);
        }
        self.inner.store.persist_run(&run).await?;
        tracing::warn!(
            run_id = %run.id,
            status = %was,
            "interrupted run marked failed"
        );
        Ok(Some(run.id))
    }

    /// Claims the single-flight slot, persists a `Pending` run and starts
    /// driving it in the background.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::RunAlreadyInProgress`] if any run is non-terminal.
    /// - [`PipelineError::InvalidOverrides`] for unusable overrides.
    /// - [`PipelineError::ShuttingDown`] after [`Orchestrator::shutdown`].
    /// - [`PipelineError::Store`] if the claim cannot be persisted, or the
    ///   previous run's final state still cannot be saved.
    pub async fn start_run(
        &self,
        trigger: &str,
        overrides: RunOverrides,
    ) -> Result<Uuid, PipelineError> {
        if self.inner.stop.is_stopped() {
            return Err(PipelineError::ShuttingDown);
        }
        let params = self.inner.settings.resolve(&overrides)?;

        let mut active = self.inner.active.lock().await;
        if let Some(id) = *active {
            if !self.flush_unsaved(id).await? {
                return Err(PipelineError::RunAlreadyInProgress(id));
            }
            *active = None;
        }
        if let Some(existing) = self.inner.store.load_active().await? {
            return Err(PipelineError::RunAlreadyInProgress(existing.id));
        }

        let run = WorkflowRun::new(trigger, overrides, Utc::now());
        match self.inner.store.persist_run(&run).await {
            Ok(()) => {}
            Err(StoreError::ActiveRunExists(id)) => {
                return Err(PipelineError::RunAlreadyInProgress(id));
            }
            Err(err) => return Err(err.into()),
        }

        let run_id = run.id;
        *active = Some(run_id);
        tracing::info!(%run_id, trigger, "run created");

        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(run, params).await });
        *self.inner.task.lock().await = Some(handle);
        Ok(run_id)
    }

    /// Starts a run and waits for it to finish. Used by the CLI.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::start_run`], plus [`PipelineError::RunNotFound`]
    /// if the finished run cannot be read back.
    pub async fn run_to_completion(
        &self,
        trigger: &str,
        overrides: RunOverrides,
    ) -> Result<WorkflowRun, PipelineError> {
        let run_id = self.start_run(trigger, overrides).await?;
        match self.wait_idle().await {
            Some(run) if run.id == run_id => Ok(run),
            _ => self.run_status(run_id).await,
        }
    }

    /// Waits for the background run, if any, and returns its final state.
    pub async fn wait_idle(&self) -> Option<WorkflowRun> {
        let handle = self.inner.task.lock().await.take()?;
        match handle.await {
            Ok(run) => Some(run),
            Err(err) => {
                tracing::error!(error = %err, "run task aborted");
                None
            }
        }
    }

    /// Stops accepting runs and asks the active run to wind down after its
    /// in-flight external call.
    pub fn shutdown(&self) {
        tracing::info!("pipeline shutdown requested");
        self.inner.stop.request_stop();
    }

    pub async fn active_run_id(&self) -> Option<Uuid> {
        *self.inner.active.lock().await
    }

    /// # Errors
    ///
    /// [`PipelineError::RunNotFound`] for an unknown ID.
    pub async fn run_status(&self, run_id: Uuid) -> Result<WorkflowRun, PipelineError> {
        if let Some(run) = self
            .inner
            .unsaved
            .lock()
            .await
            .as_ref()
            .filter(|r| r.id == run_id)
        {
            return Ok(run.clone());
        }
        self.inner
            .store
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    /// # Errors
    ///
    /// [`PipelineError::Store`] if the store cannot be read.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, PipelineError> {
        let mut runs = self.inner.store.list_recent(limit).await?;
        if let Some(pending) = self.inner.unsaved.lock().await.as_ref() {
            for run in runs.iter_mut().filter(|r| r.id == pending.id) {
                run.clone_from(pending);
            }
        }
        Ok(runs)
    }

    /// Runs CollectMetrics on its own, outside any workflow run.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ShuttingDown`] after [`Orchestrator::shutdown`].
    pub async fn collect_metrics_now(&self) -> Result<StageOutcome, PipelineError> {
        if self.inner.stop.is_stopped() {
            return Err(PipelineError::ShuttingDown);
        }
        let settings = &self.inner.settings;
        let ctx = StageContext {
            run_id: None,
            params: RunParameters {
                communities: settings.communities.clone(),
                min_score: settings.scoring.min_score,
                top_k: settings.scoring.top_k,
            },
            stop: self.inner.stop.clone(),
        };
        let (_, outcome) = self.inner.collect.execute(&ctx, ()).await;
        Ok(outcome)
    }

    async fn drive(&self, mut run: WorkflowRun, params: RunParameters) -> WorkflowRun {
        let ctx = StageContext {
            run_id: Some(run.id),
            params,
            stop: self.inner.stop.clone(),
        };
        tracing::info!(run_id = %run.id, trigger = %run.trigger, "run started");

        let finish = match self.run_stages(&mut run, &ctx).await {
            Ok(finish) | Err(finish) => finish,
        };
        let now = Utc::now();
        let ended = match finish {
            Finish::Completed(note) => {
                run.notes.extend(note);
                run.transition(RunStatus::Completed, now)
            }
            Finish::Failed(reason) => run.fail(&reason, now),
        };
        if let Err(err) = ended {
            tracing::error!(run_id = %run.id, error = %err, "could not finalize run");
        }
        let saved = self.persist_final(&run).await;

        match run.status {
            RunStatus::Completed => tracing::info!(
                run_id = %run.id,
                published = run.counters.published,
                failed = run.counters.failed,
                duration_secs = run.duration_secs(),
                "run completed"
            ),
            status => tracing::error!(
                run_id = %run.id,
                %status,
                notes = ?run.notes,
                "run failed"
            ),
        }

        let mut active = self.inner.active.lock().await;
        if saved {
            *active = None;
        } else {
            *self.inner.unsaved.lock().await = Some(run.clone());
        }
        run
    }

    /// Saves the terminal snapshot, retrying like an external call.
    async fn persist_final(&self, run: &WorkflowRun) -> bool {
        let store = &self.inner.store;
        let outcome = self
            .inner
            .persist_retry
            .run("run_store", || async move {
                store
                    .persist_run(run)
                    .await
                    .map_err(|err| ServiceError::Unavailable(err.to_string()))
            })
            .await;
        match outcome.result {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    run_id = %run.id,
                    status = %run.status,
                    attempts = outcome.attempts,
                    error = %err,
                    "failed to persist final run state; holding the run slot until it is saved"
                );
                false
            }
        }
    }

    /// Saves a finished run the store refused earlier. `Ok(false)` means
    /// `run_id` is still being driven.
    async fn flush_unsaved(&self, run_id: Uuid) -> Result<bool, PipelineError> {
        let mut unsaved = self.inner.unsaved.lock().await;
        let Some(run) = unsaved.as_ref().filter(|r| r.id == run_id) else {
            return Ok(false);
        };
        self.inner.store.persist_run(run).await?;
        tracing::info!(%run_id, status = %run.status, "deferred final run state saved");
        *unsaved = None;
        Ok(true)
    }

    async fn run_stages(
        &self,
        run: &mut WorkflowRun,
        ctx: &StageContext,
    ) -> Result<Finish, Finish> {
        let inner = &*self.inner;

        self.enter(run, RunStatus::Scraping).await?;
        let (candidates, outcome) = inner.scrape.execute(ctx, ()).await;
        run.counters.scraped = saturating_u32(candidates.len());
        if let Some(reason) = Self::conclude_stage(run, ctx, outcome)? {
            return Err(Finish::Failed(reason));
        }
        if candidates.is_empty() {
            return Ok(Finish::Completed(Some("no new candidates found".to_owned())));
        }

        self.enter(run, RunStatus::Scoring).await?;
        let (ranking, outcome) = inner.score.execute(ctx, candidates).await;
        run.counters.scored = saturating_u32(outcome.input_count);
        run.counters.above_threshold = saturating_u32(ranking.above_threshold);
        run.counters.average_score = ranking.average_score;
        Self::conclude_stage(run, ctx, outcome)?;
        if ranking.selected.is_empty() {
            return Ok(Finish::Completed(Some(
                "no candidates above the score threshold".to_owned(),
            )));
        }

        self.enter(run, RunStatus::Generating).await?;
        let (generated, outcome) = inner.generate.execute(ctx, ranking.selected).await;
        run.counters.generated = saturating_u32(generated.len());
        run.counters.failed = run
            .counters
            .failed
            .saturating_add(saturating_u32(outcome.failed_items()));
        if let Some(reason) = Self::conclude_stage(run, ctx, outcome)? {
            return Err(Finish::Failed(reason));
        }
        if generated.is_empty() {
            return Ok(Finish::Completed(Some("nothing was generated".to_owned())));
        }

        self.enter(run, RunStatus::Publishing).await?;
        let (published, outcome) = inner.publish.execute(ctx, generated).await;
        run.published_source_ids
            .extend(published.iter().map(|p| p.source_id.clone()));
        run.counters.published = saturating_u32(published.len());
        run.counters.duplicates = saturating_u32(duplicate_count(&outcome));
        run.counters.publish_failed = saturating_u32(outcome.failed_items());
        run.counters.failed = run
            .counters
            .failed
            .saturating_add(run.counters.publish_failed);
        if let Some(reason) = Self::conclude_stage(run, ctx, outcome)? {
            return Err(Finish::Failed(reason));
        }
        if published.is_empty() {
            return Ok(Finish::Completed(Some("nothing new to publish".to_owned())));
        }

        self.enter(run, RunStatus::CollectingMetrics).await?;
        let (_, outcome) = inner.collect.execute(ctx, ()).await;
        if let Some(reason) = Self::conclude_stage(run, ctx, outcome)? {
            return Err(Finish::Failed(reason));
        }
        Ok(Finish::Completed(None))
    }

    /// Transitions and persists before the stage starts.
    async fn enter(&self, run: &mut WorkflowRun, to: RunStatus) -> Result<(), Finish> {
        run.transition(to, Utc::now())
            .map_err(|err| Finish::Failed(err.to_string()))?;
        self.inner.store.persist_run(run).await.map_err(|err| {
            tracing::error!(run_id = %run.id, status = %to, error = %err, "failed to persist transition");
            Finish::Failed(format!("could not persist transition to {to}: {err}"))
        })?;
        tracing::info!(run_id = %run.id, status = %to, "run advanced");
        Ok(())
    }

    /// Records the outcome and decides whether the run can go on.
    ///
    /// `Err` ends the run as cancelled; `Ok(Some(reason))` means the stage
    /// failed outright.
    fn conclude_stage(
        run: &mut WorkflowRun,
        ctx: &StageContext,
        outcome: StageOutcome,
    ) -> Result<Option<String>, Finish> {
        let failed_items = outcome.failed_items();
        if outcome.status == StageStatus::Success && failed_items > 0 {
            run.notes.push(format!(
                "{}: {failed_items} of {} item(s) failed",
                outcome.stage, outcome.input_count
            ));
        }
        let failure = (outcome.status == StageStatus::Failed).then(|| {
            let detail = outcome
                .error
                .as_ref()
                .map_or("no usable output", |e| e.message.as_str());
            format!("{} failed: {detail}", outcome.stage)
        });
        tracing::info!(
            run_id = %run.id,
            stage = %outcome.stage,
            status = ?outcome.status,
            input = outcome.input_count,
            output = outcome.output_count,
            retries = outcome.retries,
            duration_ms = outcome.duration_ms,
            "stage finished"
        );
        run.record_stage(outcome);

        if ctx.stop.is_stopped() {
            return Err(Finish::Failed(CANCELLED.to_owned()));
        }
        Ok(failure)
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[async_trait]
impl RunTrigger for Orchestrator {
    async fn trigger(&self, source: &str) -> Result<Uuid, PipelineError> {
        self.start_run(source, RunOverrides::default()).await
    }

    async fn active_run(&self) -> Option<Uuid> {
        self.active_run_id().await
    }
}
