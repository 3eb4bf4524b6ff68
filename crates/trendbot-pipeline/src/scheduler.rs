//! Fixed-interval run trigger with single-flight deduplication.
//!
//! The scheduler owns only its timer and counters. Whether a trigger becomes
//! a run is decided by the [`RunTrigger`], which rejects it while another run
//! is non-terminal; such ticks are counted and logged, never treated as errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::PipelineError;

/// Something that can be asked to start a run.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    /// Starts a run tagged with `source`.
    async fn trigger(&self, source: &str) -> Result<Uuid, PipelineError>;

    /// The non-terminal run, if one is being driven.
    async fn active_run(&self) -> Option<Uuid>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    /// `None` while disabled or stopped.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub active_run_id: Option<Uuid>,
    pub triggers_fired: u64,
    pub runs_started: u64,
    pub skipped_in_flight: u64,
    pub last_trigger_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    running: bool,
    next_fire_at: Option<DateTime<Utc>>,
    triggers_fired: u64,
    runs_started: u64,
    skipped_in_flight: u64,
    last_trigger_at: Option<DateTime<Utc>>,
}

struct SchedulerInner {
    trigger: Arc<dyn RunTrigger>,
    interval: Duration,
    enabled: AtomicBool,
    state: Mutex<SchedulerState>,
    shutdown: watch::Sender<bool>,
}

/// Created at process start, stopped on shutdown.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

fn after(now: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

impl Scheduler {
    #[must_use]
    pub fn new(trigger: Arc<dyn RunTrigger>, interval: Duration, enabled: bool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                trigger,
                interval: interval.max(Duration::from_secs(1)),
                enabled: AtomicBool::new(enabled),
                state: Mutex::new(SchedulerState::default()),
                shutdown,
            }),
        }
    }

    /// Spawns the timer loop. The first tick fires one interval from now.
    pub fn start(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_loop().await })
    }

    /// Ends the timer loop. A run already in progress is left alone.
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Enables or disables future triggers without touching an active run.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::info!(enabled, "scheduler toggled");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let enabled = self.is_enabled();
        let active_run_id = self.inner.trigger.active_run().await;
        let state = self.inner.state.lock().await;
        SchedulerStatus {
            enabled,
            running: state.running,
            interval_secs: self.inner.interval.as_secs(),
            next_fire_at: if enabled { state.next_fire_at } else { None },
            active_run_id,
            triggers_fired: state.triggers_fired,
            runs_started: state.runs_started,
            skipped_in_flight: state.skipped_in_flight,
            last_trigger_at: state.last_trigger_at,
        }
    }

    async fn run_loop(&self) {
        let interval = self.inner.interval;
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        {
            let mut state = self.inner.state.lock().await;
            state.running = true;
            state.next_fire_at = after(Utc::now(), interval);
        }
        tracing::info!(interval_secs = interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.fire().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let mut state = self.inner.state.lock().await;
        state.running = false;
        state.next_fire_at = None;
        tracing::info!("scheduler stopped");
    }

    async fn fire(&self) {
        let now = Utc::now();
        self.inner.state.lock().await.next_fire_at = after(now, self.inner.interval);

        if !self.is_enabled() {
            tracing::debug!("scheduler disabled, tick ignored");
            return;
        }
        {
            let mut state = self.inner.state.lock().await;
            state.triggers_fired += 1;
            state.last_trigger_at = Some(now);
        }

        match self.inner.trigger.trigger("scheduler").await {
            Ok(run_id) => {
                self.inner.state.lock().await.runs_started += 1;
                tracing::info!(%run_id, "scheduled run started");
            }
            Err(PipelineError::RunAlreadyInProgress(active)) => {
                self.inner.state.lock().await.skipped_in_flight += 1;
                tracing::info!(active_run_id = %active, "run in progress, trigger skipped");
            }
            Err(PipelineError::ShuttingDown) => {
                tracing::debug!("pipeline shutting down, trigger ignored");
            }
            Err(err) => {
                tracing::error!(error = %err, "scheduled trigger failed");
            }
        }
    }
}
