//! Persistence contract with the external store.
//!
//! The runtime only needs CRUD of sources and backend rows plus the
//! `log_events_updated_at` touch; no business logic lives behind this
//! trait. [`MemStore`] is the in-memory implementation used by tests
//! and single-process embeddings.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backends;
use crate::error::Error;
use crate::source::{BackendId, Source, SourceBackend, SourceId, SourceToken};

/// Read/write surface the runtime requires from the external store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(&self, id: SourceId) -> Option<Source>;

    async fn get_source_by_token(&self, token: SourceToken) -> Option<Source>;

    async fn list_backends(&self, source_id: SourceId) -> Vec<SourceBackend>;

    /// Stores a backend row. The row is validated through the adaptor
    /// table first: unknown types and invalid configurations are
    /// rejected and never persisted.
    async fn create_backend(&self, backend: SourceBackend) -> Result<SourceBackend, Error>;

    /// Records that the source received fresh events recently.
    async fn touch_log_events_updated_at(&self, source_id: SourceId, when_micros: u64);
}

/// In-memory store.
#[derive(Default)]
pub struct MemStore {
    sources: DashMap<SourceId, Source>,
    by_token: DashMap<SourceToken, SourceId>,
    backends: DashMap<BackendId, SourceBackend>,
    touched: DashMap<SourceId, u64>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Inserts or replaces a source.
    pub fn insert_source(&self, source: Source) {
        self.by_token.insert(source.token, source.id);
        self.sources.insert(source.id, source);
    }

    /// The last recorded touch for a source, if any.
    #[must_use]
    pub fn log_events_updated_at(&self, source_id: SourceId) -> Option<u64> {
        self.touched.get(&source_id).map(|at| *at)
    }
}

#[async_trait]
impl SourceStore for MemStore {
    async fn get_source(&self, id: SourceId) -> Option<Source> {
        self.sources.get(&id).map(|source| source.clone())
    }

    async fn get_source_by_token(&self, token: SourceToken) -> Option<Source> {
        let id = *self.by_token.get(&token)?;
        self.get_source(id).await
    }

    async fn list_backends(&self, source_id: SourceId) -> Vec<SourceBackend> {
        let mut rows: Vec<SourceBackend> = self
            .backends
            .iter()
            .filter(|row| row.source_id == source_id)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    async fn create_backend(&self, backend: SourceBackend) -> Result<SourceBackend, Error> {
        backends::validate_backend(&backend)?;
        self.backends.insert(backend.id, backend.clone());
        Ok(backend)
    }

    async fn touch_log_events_updated_at(&self, source_id: SourceId, when_micros: u64) {
        self.touched.insert(source_id, when_micros);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook_row(id: i64, source_id: SourceId, url: &str) -> SourceBackend {
        let serde_json::Value::Object(config) = json!({"url": url}) else {
            panic!("expected object");
        };
        SourceBackend {
            id: BackendId(id),
            source_id,
            kind: "webhook".to_owned(),
            config,
        }
    }

    #[tokio::test]
    async fn test_source_lookup_by_id_and_token() {
        let store = MemStore::new();
        let source = Source::new(SourceId(1), SourceToken::random(), "api");
        store.insert_source(source.clone());

        assert_eq!(store.get_source(source.id).await.unwrap().name, "api");
        assert_eq!(
            store.get_source_by_token(source.token).await.unwrap().id,
            source.id
        );
        assert!(store.get_source(SourceId(99)).await.is_none());
        assert!(store
            .get_source_by_token(SourceToken::random())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_create_backend_validates_through_adaptor_table() {
        let store = MemStore::new();

        let mut unknown = webhook_row(1, SourceId(1), "https://example.com");
        unknown.kind = "bigtable".to_owned();
        assert!(matches!(
            store.create_backend(unknown).await,
            Err(Error::UnknownBackendType(_))
        ));

        let mut invalid = webhook_row(2, SourceId(1), "https://example.com");
        invalid.config.clear();
        assert!(matches!(
            store.create_backend(invalid).await,
            Err(Error::InvalidConfig(_))
        ));

        // rejected rows are never listed
        assert!(store.list_backends(SourceId(1)).await.is_empty());

        let valid = webhook_row(3, SourceId(1), "https://example.com/hooks");
        store.create_backend(valid).await.unwrap();
        assert_eq!(store.list_backends(SourceId(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_backends_is_per_source_and_ordered() {
        let store = MemStore::new();
        for (id, source_id) in [(2, 1), (1, 1), (3, 2)] {
            store
                .create_backend(webhook_row(id, SourceId(source_id), "https://example.com"))
                .await
                .unwrap();
        }

        let rows = store.list_backends(SourceId(1)).await;
        assert_eq!(
            rows.iter().map(|row| row.id).collect::<Vec<_>>(),
            vec![BackendId(1), BackendId(2)]
        );
    }

    #[tokio::test]
    async fn test_touch_records_latest_timestamp() {
        let store = MemStore::new();
        assert!(store.log_events_updated_at(SourceId(1)).is_none());

        store.touch_log_events_updated_at(SourceId(1), 100).await;
        store.touch_log_events_updated_at(SourceId(1), 200).await;
        assert_eq!(store.log_events_updated_at(SourceId(1)), Some(200));
    }
}
