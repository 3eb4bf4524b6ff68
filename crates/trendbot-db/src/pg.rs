//! Postgres-backed [`RunStore`].

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use trendbot_core::{
    EngagementCounters, MetricSnapshot, PublishedItem, RunCounters, RunOverrides, RunStatus,
    RunStore, StageOutcome, StoreError, WorkflowRun,
};
use uuid::Uuid;

use crate::DbError;

const SINGLE_ACTIVE_INDEX: &str = "workflow_runs_single_active";
const UNIQUE_VIOLATION: &str = "23505";

const RUN_COLUMNS: &str = "id, status, trigger_source, overrides, started_at, ended_at, \
                           stages, published_ids, counters, notes";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `workflow_runs` table.
#[derive(Debug, sqlx::FromRow)]
struct WorkflowRunRow {
    id: Uuid,
    status: String,
    trigger_source: String,
    overrides: Json<RunOverrides>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    stages: Json<Vec<StageOutcome>>,
    published_ids: Json<Vec<String>>,
    counters: Json<RunCounters>,
    notes: Json<Vec<String>>,
}

impl TryFrom<WorkflowRunRow> for WorkflowRun {
    type Error = DbError;

    fn try_from(row: WorkflowRunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|reason| DbError::Decode {
                table: "workflow_runs",
                reason,
            })?;
        Ok(WorkflowRun {
            id: row.id,
            status,
            trigger: row.trigger_source,
            overrides: row.overrides.0,
            started_at: row.started_at,
            ended_at: row.ended_at,
            stages: row.stages.0,
            published_source_ids: row.published_ids.0,
            counters: row.counters.0,
            notes: row.notes.0,
        })
    }
}

/// A row from the `published_items` table.
#[derive(Debug, sqlx::FromRow)]
struct PublishedItemRow {
    source_id: String,
    external_id: String,
    text: String,
    model: String,
    prompt_version: String,
    run_id: Uuid,
    virality_score: f64,
    published_at: DateTime<Utc>,
}

impl From<PublishedItemRow> for PublishedItem {
    fn from(row: PublishedItemRow) -> Self {
        PublishedItem {
            source_id: row.source_id,
            external_id: row.external_id,
            text: row.text,
            model: row.model,
            prompt_version: row.prompt_version,
            run_id: row.run_id,
            virality_score: row.virality_score,
            published_at: row.published_at,
        }
    }
}

/// A row from the `metric_snapshots` table.
#[derive(Debug, sqlx::FromRow)]
struct MetricSnapshotRow {
    source_id: String,
    external_id: String,
    likes: i64,
    reshares: i64,
    replies: i64,
    captured_at: DateTime<Utc>,
}

impl From<MetricSnapshotRow> for MetricSnapshot {
    fn from(row: MetricSnapshotRow) -> Self {
        MetricSnapshot {
            source_id: row.source_id,
            external_id: row.external_id,
            counters: EngagementCounters {
                likes: row.likes,
                reshares: row.reshares,
                replies: row.replies,
            },
            captured_at: row.captured_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn active_run_id(&self) -> Result<Option<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM workflow_runs WHERE status NOT IN ('completed', 'failed') LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    DbError::from(err).into()
}

fn rows_to_runs(rows: Vec<WorkflowRunRow>) -> Result<Vec<WorkflowRun>, StoreError> {
    rows.into_iter()
        .map(|row| WorkflowRun::try_from(row).map_err(StoreError::from))
        .collect()
}

fn is_single_active_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint() == Some(SINGLE_ACTIVE_INDEX)
        }
        _ => false,
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn persist_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        // Terminal rows are immutable: the update arm only fires while the
        // stored row is still active.
        let result = sqlx::query(
            "INSERT INTO workflow_runs \
                 (id, status, trigger_source, overrides, started_at, ended_at, \
                  stages, published_ids, counters, notes, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 ended_at = EXCLUDED.ended_at, \
                 stages = EXCLUDED.stages, \
                 published_ids = EXCLUDED.published_ids, \
                 counters = EXCLUDED.counters, \
                 notes = EXCLUDED.notes, \
                 updated_at = NOW() \
             WHERE workflow_runs.status NOT IN ('completed', 'failed')",
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(&run.trigger)
        .bind(Json(&run.overrides))
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(Json(&run.stages))
        .bind(Json(&run.published_source_ids))
        .bind(Json(&run.counters))
        .bind(Json(&run.notes))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                if done.rows_affected() == 0 {
                    tracing::debug!(run_id = %run.id, "run already terminal, snapshot not overwritten");
                }
                Ok(())
            }
            Err(err) if is_single_active_violation(&err) => {
                let active = self.active_run_id().await?.unwrap_or(run.id);
                tracing::warn!(run_id = %run.id, active_run_id = %active, "second active run rejected");
                Err(StoreError::ActiveRunExists(active))
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(WorkflowRun::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn load_active(&self) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs \
             WHERE status NOT IN ('completed', 'failed') \
             ORDER BY started_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(WorkflowRun::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowRun>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs \
             ORDER BY started_at DESC, id DESC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows_to_runs(rows)
    }

    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkflowRun>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs \
             WHERE started_at >= $1 ORDER BY started_at ASC, id ASC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows_to_runs(rows)
    }

    async fn published_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if source_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found = sqlx::query_scalar::<_, String>(
            "SELECT source_id FROM dedup_index WHERE source_id = ANY($1)",
        )
        .bind(source_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(found.into_iter().collect())
    }

    async fn record_rejected(&self, source_id: &str, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rejected_sources (source_id, run_id) VALUES ($1, $2) \
             ON CONFLICT (source_id) DO NOTHING",
        )
        .bind(source_id)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn rejected_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if source_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found = sqlx::query_scalar::<_, String>(
            "SELECT source_id FROM rejected_sources WHERE source_id = ANY($1)",
        )
        .bind(source_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(found.into_iter().collect())
    }

    async fn record_published(&self, item: &PublishedItem) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let claimed = sqlx::query(
            "INSERT INTO dedup_index (source_id) VALUES ($1) ON CONFLICT (source_id) DO NOTHING",
        )
        .bind(&item.source_id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(backend)?;
            return Err(StoreError::AlreadyPublished(item.source_id.clone()));
        }

        sqlx::query(
            "INSERT INTO published_items \
                 (source_id, external_id, text, model, prompt_version, run_id, \
                  virality_score, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&item.source_id)
        .bind(&item.external_id)
        .bind(&item.text)
        .bind(&item.model)
        .bind(&item.prompt_version)
        .bind(item.run_id)
        .bind(item.virality_score)
        .bind(item.published_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        let rows = sqlx::query_as::<_, PublishedItemRow>(
            "SELECT source_id, external_id, text, model, prompt_version, run_id, \
                    virality_score, published_at \
             FROM published_items \
             WHERE published_at >= $1 \
             ORDER BY published_at ASC, source_id ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(PublishedItem::from).collect())
    }

    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO metric_snapshots \
                 (source_id, external_id, likes, reshares, replies, captured_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&snapshot.source_id)
        .bind(&snapshot.external_id)
        .bind(snapshot.counters.likes)
        .bind(snapshot.counters.reshares)
        .bind(snapshot.counters.replies)
        .bind(snapshot.captured_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn snapshots_for(&self, source_id: &str) -> Result<Vec<MetricSnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, MetricSnapshotRow>(
            "SELECT source_id, external_id, likes, reshares, replies, captured_at \
             FROM metric_snapshots \
             WHERE source_id = $1 \
             ORDER BY captured_at ASC, id ASC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(MetricSnapshot::from).collect())
    }

    async fn latest_snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, MetricSnapshotRow>(
            "SELECT DISTINCT ON (s.source_id) \
                    s.source_id, s.external_id, s.likes, s.reshares, s.replies, s.captured_at \
             FROM metric_snapshots s \
             JOIN published_items p ON p.source_id = s.source_id \
             WHERE p.published_at >= $1 \
             ORDER BY s.source_id, s.captured_at DESC, s.id DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(MetricSnapshot::from).collect())
    }
}
