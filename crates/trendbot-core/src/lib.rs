//! Domain types and pure logic for the trend pipeline.
//!
//! Everything here is free of I/O: the data model, the run state machine
//! types, the virality scorer, the error taxonomy shared by every stage, and
//! the narrow collaborator traits the orchestrator drives.

mod app_config;
mod candidate;
mod collaborators;
mod config;
mod error;
mod run;
mod scoring;
mod store;
mod text;

use thiserror::Error;

pub use app_config::{
    AppConfig, Environment, LogFormat, RateLimitSettings, RetrySettings, ScoringSettings,
};
pub use candidate::{
    Candidate, EngagementCounters, GeneratedContent, MetricSnapshot, PublishedItem,
    ScoreBreakdown, ScoredCandidate,
};
pub use collaborators::{ContentSource, GenerativeText, Publisher};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::{ErrorClass, ServiceError};
pub use run::{
    InvalidTransition, ItemOutcome, ItemStatus, RunCounters, RunOverrides, RunStatus, StageError, StageName,
    StageOutcome, StageStatus, WorkflowRun,
};
pub use scoring::{rank_candidates, score_candidate};
pub use store::{RunStore, StoreError};
pub use text::truncate_at_word_boundary;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
