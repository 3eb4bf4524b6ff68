//! Workflow orchestration for the trend pipeline.
//!
//! A [`Scheduler`] asks the [`Orchestrator`] for a run every interval; the
//! orchestrator drives Scrape → Score → Generate → Publish → CollectMetrics,
//! persisting the [`trendbot_core::WorkflowRun`] after every transition.
//! Every external call goes through a [`ServiceGuard`]: the per-service
//! [`RateLimiter`], a per-call timeout and the shared [`RetryPolicy`].

mod control;
mod error;
mod guard;
mod orchestrator;
mod rate_limit;
mod retry;
mod scheduler;
mod settings;
pub mod stages;
mod stats;

pub use control::ControlPlane;
pub use error::PipelineError;
pub use guard::ServiceGuard;
pub use orchestrator::{Collaborators, Orchestrator};
pub use rate_limit::RateLimiter;
pub use retry::{CallOutcome, RetryPolicy};
pub use scheduler::{RunTrigger, Scheduler, SchedulerStatus};
pub use settings::{PipelineSettings, RunParameters};
pub use stages::StopFlag;
pub use stats::{compute_stats, AggregateStats};
