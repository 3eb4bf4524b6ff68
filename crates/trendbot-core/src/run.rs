//! The `WorkflowRun` record and its explicit state machine.
//!
//! ```text
//! Pending -> Scraping -> Scoring -> Generating -> Publishing -> CollectingMetrics -> Completed
//!    \_________\___________\____________\____________\______________> Failed ---> Completed
//! ```
//!
//! Any non-terminal status may also jump straight to `Completed` when the
//! pipeline empties (nothing scraped, nothing above threshold). `Failed` may
//! only be promoted to `Completed` when the run already published something.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ErrorClass, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Scraping,
    Scoring,
    Generating,
    Publishing,
    CollectingMetrics,
    Completed,
    Failed,
}

impl RunStatus {
    pub const NON_TERMINAL: [RunStatus; 6] = [
        RunStatus::Pending,
        RunStatus::Scraping,
        RunStatus::Scoring,
        RunStatus::Generating,
        RunStatus::Publishing,
        RunStatus::CollectingMetrics,
    ];

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// The next status in the fixed stage sequence.
    #[must_use]
    pub fn next(self) -> Option<RunStatus> {
        match self {
            RunStatus::Pending => Some(RunStatus::Scraping),
            RunStatus::Scraping => Some(RunStatus::Scoring),
            RunStatus::Scoring => Some(RunStatus::Generating),
            RunStatus::Generating => Some(RunStatus::Publishing),
            RunStatus::Publishing => Some(RunStatus::CollectingMetrics),
            RunStatus::CollectingMetrics => Some(RunStatus::Completed),
            RunStatus::Completed | RunStatus::Failed => None,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: RunStatus) -> bool {
        if self.next() == Some(to) {
            return true;
        }
        match (self, to) {
            (RunStatus::Failed, RunStatus::Completed) => true,
            (from, RunStatus::Completed | RunStatus::Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Scraping => "scraping",
            RunStatus::Scoring => "scoring",
            RunStatus::Generating => "generating",
            RunStatus::Publishing => "publishing",
            RunStatus::CollectingMetrics => "collecting_metrics",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "scraping" => Ok(RunStatus::Scraping),
            "scoring" => Ok(RunStatus::Scoring),
            "generating" => Ok(RunStatus::Generating),
            "publishing" => Ok(RunStatus::Publishing),
            "collecting_metrics" => Ok(RunStatus::CollectingMetrics),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scrape,
    Score,
    Generate,
    Publish,
    CollectMetrics,
}

impl StageName {
    /// Run status while this stage executes.
    #[must_use]
    pub fn run_status(self) -> RunStatus {
        match self {
            StageName::Scrape => RunStatus::Scraping,
            StageName::Score => RunStatus::Scoring,
            StageName::Generate => RunStatus::Generating,
            StageName::Publish => RunStatus::Publishing,
            StageName::CollectMetrics => RunStatus::CollectingMetrics,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Scrape => "scrape",
            StageName::Score => "score",
            StageName::Generate => "generate",
            StageName::Publish => "publish",
            StageName::CollectMetrics => "collect_metrics",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// Classified, caller-safe description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl StageError {
    #[must_use]
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for StageError {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.class(), err.code(), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Skipped,
    Failed,
}

/// Result for one candidate (or community, for Scrape) inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub key: String,
    pub status: ItemStatus,
    pub attempts: u32,
    pub error: Option<StageError>,
}

impl ItemOutcome {
    #[must_use]
    pub fn succeeded(key: impl Into<String>, attempts: u32) -> Self {
        Self {
            key: key.into(),
            status: ItemStatus::Succeeded,
            attempts,
            error: None,
        }
    }

    #[must_use]
    pub fn skipped(key: impl Into<String>, attempts: u32, error: Option<StageError>) -> Self {
        Self {
            key: key.into(),
            status: ItemStatus::Skipped,
            attempts,
            error,
        }
    }

    #[must_use]
    pub fn failed(key: impl Into<String>, attempts: u32, error: StageError) -> Self {
        Self {
            key: key.into(),
            status: ItemStatus::Failed,
            attempts,
            error: Some(error),
        }
    }
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageName,
    pub status: StageStatus,
    pub error: Option<StageError>,
    /// Retries beyond the first attempt, summed over every external call.
    pub retries: u32,
    pub duration_ms: u64,
    pub input_count: usize,
    pub output_count: usize,
    pub items: Vec<ItemOutcome>,
}

impl StageOutcome {
    /// Builds an outcome from per-item results.
    ///
    /// No inputs → `Skipped`; at least one success → `Success`; otherwise the
    /// stage `Failed` with the first hard item error as the stage error. A
    /// stage whose items were all skipped (e.g. duplicates) is `Skipped`.
    #[must_use]
    pub fn from_items(
        stage: StageName,
        input_count: usize,
        output_count: usize,
        items: Vec<ItemOutcome>,
        duration_ms: u64,
    ) -> Self {
        let retries = items.iter().map(|i| i.attempts.saturating_sub(1)).sum();
        let any_failed = items.iter().any(|i| i.status == ItemStatus::Failed);
        let status = if output_count > 0 {
            StageStatus::Success
        } else if any_failed {
            StageStatus::Failed
        } else {
            StageStatus::Skipped
        };
        let error = if status == StageStatus::Failed {
            items
                .iter()
                .find(|i| i.status == ItemStatus::Failed)
                .and_then(|i| i.error.clone())
        } else {
            None
        };
        Self {
            stage,
            status,
            error,
            retries,
            duration_ms,
            input_count,
            output_count,
            items,
        }
    }

    #[must_use]
    pub fn skipped(stage: StageName, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            error: None,
            retries: 0,
            duration_ms: 0,
            input_count: 0,
            output_count: 0,
            items: vec![ItemOutcome::skipped(reason, 0, None)],
        }
    }

    #[must_use]
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .count()
    }
}

/// Per-run totals, mirrored into aggregate stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCounters {
    pub scraped: u32,
    pub scored: u32,
    pub above_threshold: u32,
    pub generated: u32,
    pub published: u32,
    pub duplicates: u32,
    /// Hard-failed items across Generate and Publish.
    pub failed: u32,
    /// The Publish share of `failed`.
    pub publish_failed: u32,
    pub average_score: Option<f64>,
}

/// Per-run overrides of configured values (all optional).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    pub min_score: Option<f64>,
    pub communities: Option<Vec<String>>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// The unit of orchestration. Persisted after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub status: RunStatus,
    /// Who asked for the run: `scheduler`, `manual` or `cli`.
    pub trigger: String,
    pub overrides: RunOverrides,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageOutcome>,
    /// Source IDs of the items this run published.
    pub published_source_ids: Vec<String>,
    pub counters: RunCounters,
    /// Human-readable notes: partial failures, interruption, cancellation.
    pub notes: Vec<String>,
}

impl WorkflowRun {
    #[must_use]
    pub fn new(trigger: &str, overrides: RunOverrides, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Pending,
            trigger: trigger.to_owned(),
            overrides,
            started_at: now,
            ended_at: None,
            stages: Vec::new(),
            published_source_ids: Vec::new(),
            counters: RunCounters::default(),
            notes: Vec::new(),
        }
    }

    /// Moves the run to `to`, stamping `ended_at` on terminal statuses.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the state machine forbids the move,
    /// including `Failed -> Completed` for a run that published nothing.
    pub fn transition(&mut self, to: RunStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let from = self.status;
        let partial_ok = from != RunStatus::Failed || !self.published_source_ids.is_empty();
        if !from.can_transition_to(to) || !partial_ok {
            return Err(InvalidTransition { from, to });
        }
        self.status = to;
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    pub fn record_stage(&mut self, outcome: StageOutcome) {
        self.stages.push(outcome);
    }

    #[must_use]
    pub fn stage(&self, name: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Ends the run after a hard failure.
    ///
    /// The run goes to `Failed`; if it already published something it is then
    /// promoted to `Completed` with the failure kept as a note, since partial
    /// success counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the run is already terminal.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Failed, now)?;
        self.notes.push(reason.to_owned());
        if !self.published_source_ids.is_empty() {
            self.transition(RunStatus::Completed, now)?;
            self.notes.push(format!(
                "completed with partial results: {} item(s) published",
                self.published_source_ids.len()
            ));
        }
        Ok(())
    }

    /// Reclassifies a run found non-terminal at startup as `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the run is already terminal.
    pub fn mark_interrupted(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let was = self.status;
        self.transition(RunStatus::Failed, now)?;
        self.notes
            .push(format!("interrupted while {was}: process restarted before the run finished"));
        Ok(())
    }

    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.ended_at.map(|end| {
            #[allow(clippy::cast_precision_loss)]
            let millis = (end - self.started_at).num_milliseconds().max(0) as f64;
            millis / 1_000.0
        })
    }
}
