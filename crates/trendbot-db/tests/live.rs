//! Live integration tests for `PgRunStore` using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/trendbot-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use chrono::{Duration, Utc};
use trendbot_core::{
    EngagementCounters, ItemOutcome, MetricSnapshot, PublishedItem, RunOverrides, RunStatus,
    RunStore, StageName, StageOutcome, StoreError, WorkflowRun,
};
use trendbot_db::PgRunStore;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_run() -> WorkflowRun {
    WorkflowRun::new(
        "manual",
        RunOverrides {
            min_score: Some(10.0),
            ..RunOverrides::default()
        },
        Utc::now(),
    )
}

fn published(source_id: &str, run_id: Uuid) -> PublishedItem {
    PublishedItem {
        source_id: source_id.to_owned(),
        external_id: format!("tweet-{source_id}"),
        text: "A post worth sharing #rust".to_owned(),
        model: "gpt-4o".to_owned(),
        prompt_version: "v1".to_owned(),
        run_id,
        virality_score: 64.2,
        published_at: Utc::now(),
    }
}

async fn completed_run(store: &PgRunStore) -> WorkflowRun {
    let mut run = new_run();
    store.persist_run(&run).await.expect("persist pending run");
    run.transition(RunStatus::Completed, Utc::now())
        .expect("pending -> completed");
    store.persist_run(&run).await.expect("persist completed run");
    run
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn run_round_trips_with_stages_and_counters(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool);
    let mut run = new_run();
    store.persist_run(&run).await.expect("insert");

    run.transition(RunStatus::Scraping, Utc::now()).unwrap();
    run.record_stage(StageOutcome::from_items(
        StageName::Scrape,
        2,
        1,
        vec![ItemOutcome::succeeded("technology", 1)],
        42,
    ));
    run.counters.scraped = 17;
    store.persist_run(&run).await.expect("update");

    let loaded = store.get_run(run.id).await.unwrap().expect("run exists");
    assert_eq!(loaded.status, RunStatus::Scraping);
    assert_eq!(loaded.stages.len(), 1);
    assert_eq!(loaded.counters.scraped, 17);
    assert_eq!(loaded.overrides.min_score, Some(10.0));
}

#[sqlx::test(migrations = "../../migrations")]
async fn second_active_run_violates_single_flight(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool);
    let first = new_run();
    store.persist_run(&first).await.expect("first run");

    let err = store
        .persist_run(&new_run())
        .await
        .expect_err("second active run must be rejected");
    assert!(
        matches!(err, StoreError::ActiveRunExists(id) if id == first.id),
        "got {err:?}"
    );

    let active = store.load_active().await.unwrap().expect("active run");
    assert_eq!(active.id, first.id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_run_is_immutable(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool);
    let run = completed_run(&store).await;

    let mut late = run.clone();
    late.notes.push("late write".to_owned());
    store.persist_run(&late).await.expect("no-op write");

    let loaded = store.get_run(run.id).await.unwrap().unwrap();
    assert!(loaded.notes.is_empty());
    assert!(store.load_active().await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_recent_orders_newest_first(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool);
    let a = completed_run(&store).await;
    let b = completed_run(&store).await;

    let recent = store.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, b.id);
    assert_eq!(recent[1].id, a.id);

    let since = store
        .runs_since(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(since.len(), 2);
}

// ---------------------------------------------------------------------------
// Dedup index and snapshots
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn record_published_is_deduplicated(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool.clone());
    let run = completed_run(&store).await;

    store
        .record_published(&published("abc123", run.id))
        .await
        .expect("first publish");
    let err = store
        .record_published(&published("abc123", run.id))
        .await
        .expect_err("duplicate must be rejected");
    assert!(matches!(err, StoreError::AlreadyPublished(ref id) if id == "abc123"));

    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM published_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    let index: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dedup_index")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!((items, index), (1, 1));

    let seen = store
        .published_source_ids(&["abc123".to_owned(), "zzz".to_owned()])
        .await
        .unwrap();
    assert!(seen.contains("abc123"));
    assert!(!seen.contains("zzz"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn rejected_sources_are_idempotent_and_separate_from_dedup(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool.clone());
    let run = completed_run(&store).await;

    store.record_rejected("dup1", run.id).await.expect("first mark");
    store.record_rejected("dup1", run.id).await.expect("second mark is a no-op");

    let ids = ["dup1".to_owned(), "other".to_owned()];
    let rejected = store.rejected_source_ids(&ids).await.unwrap();
    assert!(rejected.contains("dup1"));
    assert!(!rejected.contains("other"));
    assert!(store.published_source_ids(&ids).await.unwrap().is_empty());

    let index: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dedup_index")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(index, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn snapshots_append_and_latest_wins(pool: sqlx::PgPool) {
    let store = PgRunStore::new(pool);
    let run = completed_run(&store).await;
    let item = published("snap1", run.id);
    store.record_published(&item).await.unwrap();

    let now = Utc::now();
    for (likes, offset) in [(2, 60), (8, 30), (15, 0)] {
        store
            .append_snapshot(&MetricSnapshot {
                source_id: item.source_id.clone(),
                external_id: item.external_id.clone(),
                counters: EngagementCounters {
                    likes,
                    reshares: 1,
                    replies: 0,
                },
                captured_at: now - Duration::minutes(offset),
            })
            .await
            .unwrap();
    }

    let history = store.snapshots_for("snap1").await.unwrap();
    let likes: Vec<_> = history.iter().map(|s| s.counters.likes).collect();
    assert_eq!(likes, vec![2, 8, 15]);

    let latest = store
        .latest_snapshots_since(now - Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].counters.likes, 15);

    let recent_items = store
        .published_since(now - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(recent_items.len(), 1);
}
