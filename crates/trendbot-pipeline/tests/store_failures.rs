mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use common::{
    candidate, harness_with_store, settings, FakeGenerator, FakePublisher, FakeSource, FlakyStore,
    Harness,
};
use trendbot_core::{RunOverrides, RunStatus, RunStore, StageName, StageStatus};
use trendbot_pipeline::PipelineError;

fn flaky_harness(store: FlakyStore) -> Harness<FlakyStore> {
    harness_with_store(
        Arc::new(store),
        FakeSource::default().with_feed(
            "technology",
            Ok(vec![
                candidate("a", "technology", 900, 120),
                candidate("b", "technology", 400, 80),
            ]),
        ),
        FakeGenerator::default(),
        FakePublisher::default(),
        settings(&["technology"]),
    )
}

#[tokio::test]
async fn one_failed_final_write_is_retried() {
    let store = FlakyStore::new();
    store.fail_persist(RunStatus::Completed, 1);
    let h = flaky_harness(store);

    let run = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let stored = h.store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(h.store.load_active().await.unwrap().is_none());
    assert!(h.orchestrator.active_run_id().await.is_none());
}

#[tokio::test]
async fn unsaved_final_state_is_flushed_before_the_next_run() {
    let store = FlakyStore::new();
    // Three attempts for the final write, then one more for the first flush.
    store.fail_persist(RunStatus::Completed, 4);
    let h = flaky_harness(store);

    let first = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Completed);

    // The store still holds the run mid-flight; callers see the real outcome
    // and the slot stays claimed.
    let stale = h.store.load_active().await.unwrap().unwrap();
    assert_eq!(stale.id, first.id);
    assert_eq!(stale.status, RunStatus::CollectingMetrics);
    assert_eq!(
        h.orchestrator.run_status(first.id).await.unwrap().status,
        RunStatus::Completed
    );
    assert_eq!(
        h.orchestrator.recent_runs(5).await.unwrap()[0].status,
        RunStatus::Completed
    );
    assert_eq!(h.orchestrator.active_run_id().await, Some(first.id));

    assert!(matches!(
        h.orchestrator.start_run("scheduler", RunOverrides::default()).await,
        Err(PipelineError::Store(_))
    ));

    let second = h
        .orchestrator
        .run_to_completion("scheduler", RunOverrides::default())
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, RunStatus::Completed);

    let stored = h.store.get_run(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.published_source_ids, first.published_source_ids);
    assert!(h.store.load_active().await.unwrap().is_none());
    assert!(h.orchestrator.active_run_id().await.is_none());
}

#[tokio::test]
async fn refused_transition_stops_the_run_before_the_next_stage() {
    let store = FlakyStore::new();
    store.fail_persist(RunStatus::Generating, 1);
    let h = flaky_harness(store);

    let run = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    let stages: Vec<StageName> = run.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![StageName::Scrape, StageName::Score]);
    assert!(run
        .notes
        .iter()
        .any(|n| n.contains("could not persist transition to generating")));

    let stored = h.store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored, run);
    assert!(h.orchestrator.active_run_id().await.is_none());
}

#[tokio::test]
async fn refused_transition_and_refused_failure_do_not_wedge_the_orchestrator() {
    let store = FlakyStore::new();
    store.fail_persist(RunStatus::Generating, 1);
    store.fail_persist(RunStatus::Failed, 3);
    let h = flaky_harness(store);

    let first = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    // Neither write landed, so the store still shows the last good transition.
    assert_eq!(
        h.store.load_active().await.unwrap().unwrap().status,
        RunStatus::Scoring
    );

    let second = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(
        h.store.get_run(first.id).await.unwrap().unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn dedup_lookup_failure_fails_scrape() {
    let store = FlakyStore::new();
    store.fail_dedup_from_call.store(1, Ordering::SeqCst);
    let h = flaky_harness(store);

    let run = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let scrape = run.stage(StageName::Scrape).unwrap();
    assert_eq!(scrape.status, StageStatus::Failed);
    assert_eq!(scrape.error.as_ref().unwrap().code, "store_unavailable");
    assert!(run.stage(StageName::Score).is_none());
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dedup_recheck_failure_blocks_publishing() {
    let store = FlakyStore::new();
    // The first lookup belongs to Scrape; the per-item rechecks in Publish fail.
    store.fail_dedup_from_call.store(2, Ordering::SeqCst);
    let h = flaky_harness(store);

    let run = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.publisher.publish_calls.load(Ordering::SeqCst), 0);
    let publish = run.stage(StageName::Publish).unwrap();
    assert_eq!(publish.status, StageStatus::Failed);
    assert!(publish
        .items
        .iter()
        .all(|i| i.error.as_ref().is_some_and(|e| e.code == "store_unavailable")));
    assert_eq!(run.counters.publish_failed, 2);
}

#[tokio::test]
async fn record_failure_after_posting_is_an_item_failure() {
    let store = FlakyStore::new();
    store.fail_record_published.store(true, Ordering::SeqCst);
    let h = flaky_harness(store);

    let run = h
        .orchestrator
        .run_to_completion("cli", RunOverrides::default())
        .await
        .unwrap();

    assert_eq!(h.publisher.publish_calls.load(Ordering::SeqCst), 2);
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.published_source_ids.is_empty());
    let publish = run.stage(StageName::Publish).unwrap();
    assert_eq!(publish.status, StageStatus::Failed);
    assert_eq!(publish.error.as_ref().unwrap().code, "store_unavailable");
    assert_eq!(run.counters.publish_failed, 2);
    assert!(h
        .store
        .published_since(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap()
        .is_empty());
    assert!(run.stage(StageName::CollectMetrics).is_none());
}
