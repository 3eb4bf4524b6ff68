use thiserror::Error;
use trendbot_core::StoreError;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Single-flight: another run is still non-terminal.
    #[error("run {0} is already in progress")]
    RunAlreadyInProgress(Uuid),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("invalid run overrides: {0}")]
    InvalidOverrides(String),

    #[error("the pipeline is shutting down")]
    ShuttingDown,

    #[error("no scheduler is attached")]
    SchedulerUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}
