//! Process-local [`RunStore`] with the same invariants as the Postgres store.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use trendbot_core::{MetricSnapshot, PublishedItem, RunStore, StoreError, WorkflowRun};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<Uuid, WorkflowRun>,
    /// Doubles as the dedup index.
    published: BTreeMap<String, PublishedItem>,
    rejected: HashSet<String>,
    snapshots: Vec<MetricSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    inner: Mutex<Inner>,
}

impl MemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_runs_oldest_first(runs: &mut [WorkflowRun]) {
    runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn persist_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.runs.get(&run.id) {
            if existing.status.is_terminal() {
                return Ok(());
            }
        }
        if !run.status.is_terminal() {
            let other_active = inner
                .runs
                .values()
                .find(|r| r.id != run.id && !r.status.is_terminal())
                .map(|r| r.id);
            if let Some(active) = other_active {
                return Err(StoreError::ActiveRunExists(active));
            }
        }

        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.inner.lock().await.runs.get(&id).cloned())
    }

    async fn load_active(&self) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .runs
            .values()
            .find(|r| !r.status.is_terminal())
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<_> = self.inner.lock().await.runs.values().cloned().collect();
        sort_runs_oldest_first(&mut runs);
        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }

    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<_> = self
            .inner
            .lock()
            .await
            .runs
            .values()
            .filter(|r| r.started_at >= since)
            .cloned()
            .collect();
        sort_runs_oldest_first(&mut runs);
        Ok(runs)
    }

    async fn published_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(source_ids
            .iter()
            .filter(|id| inner.published.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn record_published(&self, item: &PublishedItem) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.published.contains_key(&item.source_id) {
            return Err(StoreError::AlreadyPublished(item.source_id.clone()));
        }
        inner.published.insert(item.source_id.clone(), item.clone());
        Ok(())
    }

    async fn record_rejected(&self, source_id: &str, _run_id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().await.rejected.insert(source_id.to_owned());
        Ok(())
    }

    async fn rejected_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(source_ids
            .iter()
            .filter(|id| inner.rejected.contains(*id))
            .cloned()
            .collect())
    }

    async fn published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        let mut items: Vec<_> = self
            .inner
            .lock()
            .await
            .published
            .values()
            .filter(|p| p.published_at >= since)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.published_at
                .cmp(&b.published_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(items)
    }

    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.published.contains_key(&snapshot.source_id) {
            return Err(StoreError::Backend(format!(
                "snapshot for unknown published item {}",
                snapshot.source_id
            )));
        }
        inner.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn snapshots_for(&self, source_id: &str) -> Result<Vec<MetricSnapshot>, StoreError> {
        let mut snaps: Vec<_> = self
            .inner
            .lock()
            .await
            .snapshots
            .iter()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps.
        snaps.sort_by_key(|s| s.captured_at);
        Ok(snaps)
    }

    async fn latest_snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        let inner = self.inner.lock().await;
        let mut latest: BTreeMap<&str, &MetricSnapshot> = BTreeMap::new();
        for snap in &inner.snapshots {
            let recent = inner
                .published
                .get(&snap.source_id)
                .is_some_and(|p| p.published_at >= since);
            if !recent {
                continue;
            }
            let newer = latest
                .get(snap.source_id.as_str())
                .is_none_or(|cur| snap.captured_at >= cur.captured_at);
            if newer {
                latest.insert(snap.source_id.as_str(), snap);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }
}
