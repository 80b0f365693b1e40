//! Fan-out of event batches to a source's backend adaptors.
//!
//! Looks up every subscription registered under the source's dispatcher
//! key and invokes each adaptor's ingest callback with the batch. The
//! callbacks hand off to the adaptors' own workers, so dispatch returns
//! after initiation; a failing adaptor cannot poison its siblings, and
//! delivery failures stay inside each adaptor's retry machinery.
//!
//! Event order within one adaptor call equals the caller's order.
//! Ordering between distinct adaptors is unspecified.

use tracing::debug;

use crate::event::LogEvent;
use crate::registry::Registry;
use crate::source::SourceId;

/// Delivers `events` to every adaptor subscribed to `source_id`.
/// Returns the number of adaptors the batch was handed to.
pub fn dispatch(registry: &Registry, source_id: SourceId, events: &[LogEvent]) -> usize {
    if events.is_empty() {
        return 0;
    }

    let mut delivered = 0;
    // TODO: spawn a task per adaptor once per-adaptor ordering is pinned
    // down by the delivery tests
    registry.dispatch(source_id, |subscription| {
        (subscription.ingest)(events.to_vec());
        delivered += 1;
    });

    if delivered > 0 {
        debug!(
            %source_id,
            adaptors = delivered,
            batch = events.len(),
            "dispatched batch"
        );
    }
    delivered
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{Subscription, WorkerEntry, WorkerHandle, WorkerKey};
    use crate::source::{BackendId, SourceToken};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    fn event(message: &str) -> LogEvent {
        let serde_json::Value::Object(params) = json!({"event_message": message}) else {
            panic!("expected object");
        };
        LogEvent::make(params, SourceToken::random(), 1).unwrap()
    }

    fn attach_probe(
        registry: &Registry,
        source_id: SourceId,
        backend_id: i64,
    ) -> Arc<Mutex<Vec<Vec<String>>>> {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let key = WorkerKey::backend(source_id, BackendId(backend_id), "probe");
        registry
            .register(
                key,
                WorkerEntry {
                    handle: WorkerHandle::Opaque,
                    cancel: CancellationToken::new(),
                },
            )
            .unwrap();
        let sink = Arc::clone(&seen);
        registry.subscribe(
            source_id,
            Subscription {
                key,
                ingest: Arc::new(move |events| {
                    let messages = events
                        .iter()
                        .map(|event| event.event_message().to_owned())
                        .collect();
                    sink.lock().unwrap().push(messages);
                }),
            },
        );
        seen
    }

    #[test]
    fn test_dispatch_reaches_every_adaptor_once() {
        let registry = Registry::new();
        let source_id = SourceId(1);
        let probe_a = attach_probe(&registry, source_id, 1);
        let probe_b = attach_probe(&registry, source_id, 2);

        let batch = vec![event("one"), event("two")];
        assert_eq!(dispatch(&registry, source_id, &batch), 2);

        for probe in [probe_a, probe_b] {
            let calls = probe.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0], vec!["one", "two"]);
        }
    }

    #[test]
    fn test_dispatch_preserves_caller_order_per_adaptor() {
        let registry = Registry::new();
        let source_id = SourceId(2);
        let probe = attach_probe(&registry, source_id, 1);

        let batch: Vec<LogEvent> = (0..10).map(|i| event(&format!("m{i}"))).collect();
        dispatch(&registry, source_id, &batch);

        let calls = probe.lock().unwrap();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(calls[0], expected);
    }

    #[test]
    fn test_empty_batch_dispatches_nothing() {
        let registry = Registry::new();
        let source_id = SourceId(3);
        let probe = attach_probe(&registry, source_id, 1);

        assert_eq!(dispatch(&registry, source_id, &[]), 0);
        assert!(probe.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        let registry = Registry::new();
        assert_eq!(dispatch(&registry, SourceId(4), &[event("x")]), 0);
    }
}
