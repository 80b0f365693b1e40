//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use logtide::config::Config;
use logtide::event::LogEvent;
use logtide::pubsub::ChannelMessage;
use logtide::registry::{Registry, Subscription, WorkerEntry, WorkerHandle, WorkerKey};
use logtide::runtime::Runtime;
use logtide::source::{BackendId, Source, SourceId, SourceToken};
use logtide::store::MemStore;

/// Configuration with test-friendly cadence: fast broadcasts, touch
/// effectively disabled, short cluster deadline.
pub fn fast_config() -> Config {
    Config {
        broadcast_interval: Duration::from_millis(20),
        touch_interval: Duration::from_secs(3600),
        touch_jitter_max: Duration::ZERO,
        cluster_list_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

pub fn new_runtime(config: Config, node_id: &str) -> (Arc<Runtime>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let runtime = Runtime::new(config, Arc::clone(&store) as _, node_id);
    (runtime, store)
}

/// A source registered in the store.
pub fn make_source(store: &MemStore, id: i64, name: &str) -> Source {
    let source = Source::new(SourceId(id), SourceToken::random(), name);
    store.insert_source(source.clone());
    source
}

pub fn raw(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Registers a recording adaptor subscription under `source_id` and
/// returns the batches it receives.
pub fn attach_probe(
    registry: &Registry,
    source_id: SourceId,
    backend_id: i64,
) -> Arc<Mutex<Vec<Vec<LogEvent>>>> {
    let seen: Arc<Mutex<Vec<Vec<LogEvent>>>> = Arc::new(Mutex::new(Vec::new()));
    let key = WorkerKey::backend(source_id, BackendId(backend_id), "probe");
    registry
        .register(
            key,
            WorkerEntry {
                handle: WorkerHandle::Opaque,
                cancel: CancellationToken::new(),
            },
        )
        .expect("probe name collision");
    let sink = Arc::clone(&seen);
    registry.subscribe(
        source_id,
        Subscription {
            key,
            ingest: Arc::new(move |events| {
                sink.lock().expect("probe poisoned").push(events);
            }),
        },
    );
    seen
}

/// Drains a channel subscription, returning the messages of every
/// `new_event` payload currently queued.
pub fn drain_new_events(
    rx: &mut tokio::sync::broadcast::Receiver<ChannelMessage>,
) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let ChannelMessage::NewEvent { event } = message {
            messages.push(event.event_message().to_owned());
        }
    }
    messages
}
