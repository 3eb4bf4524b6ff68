use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::candidate::{MetricSnapshot, PublishedItem};
use crate::run::WorkflowRun;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    /// A second non-terminal run was about to be created.
    #[error("run {0} is already active")]
    ActiveRunExists(Uuid),

    /// The dedup index already holds this source ID.
    #[error("source item {0} was already published")]
    AlreadyPublished(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable home for runs, published items and metric snapshots.
///
/// Runs are never deleted.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Upserts the whole run snapshot.
    ///
    /// Creating or updating a non-terminal run while a *different* run is
    /// non-terminal fails with [`StoreError::ActiveRunExists`].
    async fn persist_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError>;

    /// The single non-terminal run, if any.
    async fn load_active(&self) -> Result<Option<WorkflowRun>, StoreError>;

    /// Newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Runs started at or after `since`, oldest first.
    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Which of `source_ids` are already in the dedup index.
    async fn published_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Records a published item and its dedup entry atomically.
    ///
    /// Fails with [`StoreError::AlreadyPublished`] if the source ID is taken,
    /// in which case nothing is written.
    async fn record_published(&self, item: &PublishedItem) -> Result<(), StoreError>;

    /// Marks a source item the publisher refused as duplicate content.
    ///
    /// Idempotent. Writes nothing to the dedup index.
    async fn record_rejected(&self, source_id: &str, run_id: Uuid) -> Result<(), StoreError>;

    /// Which of `source_ids` were previously refused as duplicates.
    async fn rejected_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Items published at or after `since`, oldest first.
    async fn published_since(&self, since: DateTime<Utc>)
        -> Result<Vec<PublishedItem>, StoreError>;

    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError>;

    /// All snapshots for one item in capture order.
    async fn snapshots_for(&self, source_id: &str) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// The newest snapshot per item, for items published at or after `since`.
    async fn latest_snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError>;
}
