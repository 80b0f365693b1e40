//! Supervisor lifecycle: idempotent start/stop, restart, and the lazy
//! recent-logs start taken by live-tail reads.

mod common;

use std::sync::Arc;

use common::{fast_config, make_source, new_runtime, raw};
use serde_json::json;

use logtide::error::Error;
use logtide::ingest_logs;
use logtide::sources::cluster::{ClusterQuery, LocalCluster};
use logtide::sources::supervisor;

#[tokio::test]
async fn test_concurrent_starts_yield_one_supervisor() {
    let (runtime, store) = new_runtime(fast_config(), "node-a");
    let source = make_source(&store, 1, "s");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            let source = source.clone();
            tokio::spawn(async move { supervisor::start(&runtime, &source).await })
        })
        .collect();

    let mut winners = 0;
    let mut already_started = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(()) => winners += 1,
            Err(Error::AlreadyStarted) => already_started += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(already_started, 7);
    assert!(supervisor::started(&runtime, source.id));
}

#[tokio::test]
async fn test_stop_then_start_cycles_cleanly() {
    let (runtime, store) = new_runtime(fast_config(), "node-a");
    let source = make_source(&store, 1, "s");

    assert!(matches!(
        supervisor::stop(&runtime, source.id),
        Err(Error::NotStarted)
    ));

    supervisor::start(&runtime, &source).await.expect("start");
    assert!(supervisor::started(&runtime, source.id));

    supervisor::stop(&runtime, source.id).expect("stop");
    assert!(!supervisor::started(&runtime, source.id));
    assert!(runtime.registry.pipeline(source.id).is_none());
    assert!(runtime.registry.recent(source.id).is_none());

    // a fresh start works after stop
    supervisor::start(&runtime, &source).await.expect("restart");
    assert!(supervisor::started(&runtime, source.id));
}

#[tokio::test]
async fn test_restart_fails_when_not_running() {
    let (runtime, store) = new_runtime(fast_config(), "node-a");
    let source = make_source(&store, 1, "s");

    assert!(matches!(
        supervisor::restart(&runtime, &source).await,
        Err(Error::NotStarted)
    ));

    supervisor::start(&runtime, &source).await.expect("start");
    supervisor::restart(&runtime, &source).await.expect("restart");
    assert!(supervisor::started(&runtime, source.id));
}

#[tokio::test]
async fn test_ingest_after_stop_recreates_workers() {
    let (runtime, store) = new_runtime(fast_config(), "node-a");
    let source = make_source(&store, 1, "s");

    ingest_logs(
        &runtime,
        &source,
        vec![raw(json!({"event_message": "first"}))],
    )
    .await
    .expect("ingest");
    supervisor::stop(&runtime, source.id).expect("stop");

    ingest_logs(
        &runtime,
        &source,
        vec![raw(json!({"event_message": "second"}))],
    )
    .await
    .expect("ingest after stop");
    assert!(supervisor::started(&runtime, source.id));

    let pipeline = runtime.registry.pipeline(source.id).expect("pipeline");
    pipeline.flushed().await.expect("flushed");
    let latest = runtime
        .registry
        .recent(source.id)
        .expect("cache")
        .latest()
        .await
        .expect("latest")
        .expect("event");
    assert_eq!(latest.event_message(), "second");
}

#[tokio::test]
async fn test_live_tail_read_lazily_starts_cache() {
    let (runtime, store) = new_runtime(fast_config(), "node-a");
    let source = make_source(&store, 1, "s");

    let query = ClusterQuery::new(Arc::clone(&runtime), Arc::new(LocalCluster::new()));
    let events = query.list(&source).await.expect("list");

    // the cache booted lazily with its announcement event, without a
    // supervisor
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_message(), "Initialized on node node-a");
    assert!(!supervisor::started(&runtime, source.id));

    // a later supervised start adopts cache duty
    supervisor::start(&runtime, &source).await.expect("start");
    assert!(supervisor::started(&runtime, source.id));
    assert!(runtime.registry.recent(source.id).is_some());
}
