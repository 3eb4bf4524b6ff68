//! The externally-bound pipeline stages plus the in-process scoring step.
//!
//! Every stage shares one contract: `execute(ctx, input) -> (output, outcome)`.
//! Stages never return `Err`; failures are classified into the returned
//! [`StageOutcome`] so the orchestrator decides what happens to the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use trendbot_core::{ErrorClass, StageError, StageName, StageOutcome, StoreError};
use uuid::Uuid;

use crate::settings::RunParameters;

mod collect_metrics;
mod generate;
mod publish;
mod scrape;
mod score;

pub use collect_metrics::CollectMetricsStage;
pub use generate::{build_prompt, GenerateStage, PROMPT_VERSION};
pub(crate) use publish::duplicate_count;
pub use publish::PublishStage;
pub use scrape::ScrapeStage;
pub use score::{Ranking, ScoreStage};

/// Cooperative cancellation shared by the orchestrator and its stages.
///
/// Stages check it between external calls, never during one.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-execution context handed to every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// `None` when a stage runs outside a workflow run (standalone metrics).
    pub run_id: Option<Uuid>,
    pub params: RunParameters,
    pub stop: StopFlag,
}

#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn name(&self) -> StageName;

    async fn execute(&self, ctx: &StageContext, input: Self::Input)
        -> (Self::Output, StageOutcome);
}

pub(crate) const CANCELLED: &str = "cancelled";

pub(crate) fn cancelled_error() -> StageError {
    StageError::new(ErrorClass::Permanent, CANCELLED, "stop requested before the call")
}

pub(crate) fn store_error(err: &StoreError) -> StageError {
    StageError::new(ErrorClass::Transient, "store_unavailable", err.to_string())
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
