#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use trendbot_core::{
    Candidate, ContentSource, EngagementCounters, GenerativeText, MetricSnapshot, PublishedItem,
    Publisher, RateLimitSettings, RetrySettings, RunStatus, RunStore, ScoringSettings,
    ServiceError, StoreError, WorkflowRun,
};
use uuid::Uuid;
use trendbot_db::MemoryRunStore;
use trendbot_pipeline::{Collaborators, Orchestrator, PipelineSettings};

pub fn candidate(id: &str, community: &str, score: i64, comments: i64) -> Candidate {
    let now = Utc::now();
    Candidate {
        source_id: id.to_owned(),
        title: format!("Story {id}"),
        body: String::new(),
        community: community.to_owned(),
        permalink: format!("https://reddit.com/r/{community}/comments/{id}/"),
        score,
        comment_count: comments,
        created_at: now - chrono::Duration::hours(1),
        fetched_at: now,
    }
}

pub fn rate(max_requests: u32) -> RateLimitSettings {
    RateLimitSettings {
        max_requests,
        window_secs: 900,
        min_spacing_ms: 0,
        max_wait_ms: 1_000,
    }
}

pub fn settings(communities: &[&str]) -> PipelineSettings {
    PipelineSettings {
        communities: communities.iter().map(|c| (*c).to_owned()).collect(),
        fetch_limit: 25,
        scoring: ScoringSettings::default(),
        content_limit: 280,
        max_prompt_chars: 1_200,
        metrics_retention: Duration::from_secs(72 * 3_600),
        metrics_concurrency: 4,
        retry: RetrySettings {
            max_attempts: 3,
            backoff_base_ms: 0,
        },
        source_timeout: Duration::from_secs(5),
        generator_timeout: Duration::from_secs(5),
        publisher_timeout: Duration::from_secs(5),
        source_rate: rate(1_000),
        generator_rate: rate(1_000),
        publisher_rate: rate(1_000),
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub feeds: Mutex<HashMap<String, Result<Vec<Candidate>, ServiceError>>>,
    pub calls: AtomicU32,
}

impl FakeSource {
    pub fn with_feed(self, community: &str, feed: Result<Vec<Candidate>, ServiceError>) -> Self {
        self.feeds.lock().unwrap().insert(community.to_owned(), feed);
        self
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn fetch(&self, community: &str, _limit: u32) -> Result<Vec<Candidate>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .lock()
            .unwrap()
            .get(community)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Echoes the story title back; fails for titles listed in `failures`.
#[derive(Default)]
pub struct FakeGenerator {
    pub failures: Mutex<HashMap<String, ServiceError>>,
    pub calls: AtomicU32,
    /// When set, the first call parks until `release` is notified.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeGenerator {
    pub fn failing(self, source_id: &str, err: ServiceError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("Story {source_id}"), err);
        self
    }
}

#[async_trait]
impl GenerativeText for FakeGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        "gpt-4o"
    }

    async fn generate(&self, prompt: &str, _max_length: usize) -> Result<String, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let (Some((entered, release)), 0) = (&self.gate, call) {
            entered.notify_one();
            release.notified().await;
        }
        let title = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Title: "))
            .unwrap_or_default()
            .to_owned();
        if let Some(err) = self.failures.lock().unwrap().get(&title) {
            return Err(err.clone());
        }
        Ok(format!("{title} is taking off today #trending"))
    }
}

/// Assigns sequential external IDs; fails for texts listed in `failures`.
#[derive(Default)]
pub struct FakePublisher {
    pub failures: Mutex<HashMap<String, ServiceError>>,
    pub posted: Mutex<Vec<String>>,
    pub publish_calls: AtomicU32,
    pub metric_calls: AtomicU32,
}

impl FakePublisher {
    pub fn failing(self, source_id: &str, err: ServiceError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("Story {source_id} "), err);
        self
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    fn name(&self) -> &str {
        "x"
    }

    async fn publish(&self, text: &str) -> Result<String, ServiceError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| text.starts_with(needle.as_str()))
            .map(|(_, err)| err.clone());
        if let Some(err) = failure {
            return Err(err);
        }
        let mut posted = self.posted.lock().unwrap();
        posted.push(text.to_owned());
        Ok(format!("tweet-{}", posted.len()))
    }

    async fn fetch_metrics(&self, _external_id: &str) -> Result<EngagementCounters, ServiceError> {
        self.metric_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EngagementCounters {
            likes: 12,
            reshares: 3,
            replies: 1,
        })
    }
}

/// Wraps [`MemoryRunStore`] with switches that make individual calls fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryRunStore,
    /// Remaining failures per run status written by `persist_run`.
    pub persist_failures: Mutex<HashMap<RunStatus, u32>>,
    /// Dedup lookups numbered from 1; calls at or past this number fail.
    pub fail_dedup_from_call: AtomicU32,
    pub dedup_calls: AtomicU32,
    pub fail_record_published: AtomicBool,
}

fn blip() -> StoreError {
    StoreError::Backend("connection reset".to_owned())
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            fail_dedup_from_call: AtomicU32::new(u32::MAX),
            ..Self::default()
        }
    }

    pub fn fail_persist(&self, status: RunStatus, times: u32) {
        self.persist_failures.lock().unwrap().insert(status, times);
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn persist_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let fail = {
            let mut failures = self.persist_failures.lock().unwrap();
            match failures.get_mut(&run.status) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(blip());
        }
        self.inner.persist_run(run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        self.inner.get_run(id).await
    }

    async fn load_active(&self) -> Result<Option<WorkflowRun>, StoreError> {
        self.inner.load_active().await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowRun>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkflowRun>, StoreError> {
        self.inner.runs_since(since).await
    }

    async fn published_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let call = self.dedup_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.fail_dedup_from_call.load(Ordering::SeqCst) {
            return Err(blip());
        }
        self.inner.published_source_ids(source_ids).await
    }

    async fn record_rejected(&self, source_id: &str, run_id: Uuid) -> Result<(), StoreError> {
        self.inner.record_rejected(source_id, run_id).await
    }

    async fn rejected_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        self.inner.rejected_source_ids(source_ids).await
    }

    async fn record_published(&self, item: &PublishedItem) -> Result<(), StoreError> {
        if self.fail_record_published.load(Ordering::SeqCst) {
            return Err(blip());
        }
        self.inner.record_published(item).await
    }

    async fn published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PublishedItem>, StoreError> {
        self.inner.published_since(since).await
    }

    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        self.inner.append_snapshot(snapshot).await
    }

    async fn snapshots_for(&self, source_id: &str) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.inner.snapshots_for(source_id).await
    }

    async fn latest_snapshots_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.inner.latest_snapshots_since(since).await
    }
}

pub struct Harness<S = MemoryRunStore> {
    pub store: Arc<S>,
    pub source: Arc<FakeSource>,
    pub generator: Arc<FakeGenerator>,
    pub publisher: Arc<FakePublisher>,
    pub orchestrator: Orchestrator,
}

pub fn harness(
    source: FakeSource,
    generator: FakeGenerator,
    publisher: FakePublisher,
    settings: PipelineSettings,
) -> Harness {
    harness_with_store(Arc::new(MemoryRunStore::new()), source, generator, publisher, settings)
}

pub fn harness_with_store<S: RunStore + 'static>(
    store: Arc<S>,
    source: FakeSource,
    generator: FakeGenerator,
    publisher: FakePublisher,
    settings: PipelineSettings,
) -> Harness<S> {
    let source = Arc::new(source);
    let generator = Arc::new(generator);
    let publisher = Arc::new(publisher);
    let orchestrator = Orchestrator::new(
        store.clone(),
        Collaborators {
            source: source.clone(),
            generator: generator.clone(),
            publisher: publisher.clone(),
        },
        settings,
    );
    Harness {
        store,
        source,
        generator,
        publisher,
        orchestrator,
    }
}
