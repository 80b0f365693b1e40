//! Process registry: globally unique worker names and dispatcher fan-out.
//!
//! The registry is the only process-wide mutable structure on the hot
//! path. Names map `(source_id, role)` and `(source_id, backend_id,
//! sub_role)` tuples to worker handles; insertion is optimistic and a
//! collision reports [`Error::AlreadyStarted`]. Dispatcher subscriptions
//! are a separate per-source multimap: dispatch iterates a snapshot
//! taken at call time, and entries unregistered mid-dispatch are not
//! visited.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::LogEvent;
use crate::source::{BackendId, SourceId};
use crate::sources::buffer::BufferHandle;
use crate::sources::pipeline::PipelineHandle;
use crate::sources::recent::RecentLogsHandle;

/// Worker roles registered under `(source_id, role)` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Buffer,
    RecentLogs,
    Pipeline,
    Supervisor,
}

/// A structured worker name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKey {
    /// One of the source's core workers.
    Role { source_id: SourceId, role: Role },
    /// A backend worker or one of its internal sub-processes.
    Backend {
        source_id: SourceId,
        backend_id: BackendId,
        sub: &'static str,
    },
}

impl WorkerKey {
    #[must_use]
    pub fn role(source_id: SourceId, role: Role) -> Self {
        WorkerKey::Role { source_id, role }
    }

    #[must_use]
    pub fn backend(source_id: SourceId, backend_id: BackendId, sub: &'static str) -> Self {
        WorkerKey::Backend {
            source_id,
            backend_id,
            sub,
        }
    }

    #[must_use]
    pub fn source_id(&self) -> SourceId {
        match self {
            WorkerKey::Role { source_id, .. } | WorkerKey::Backend { source_id, .. } => *source_id,
        }
    }
}

/// Typed handle to a registered worker.
#[derive(Debug, Clone)]
pub enum WorkerHandle {
    Buffer(BufferHandle),
    RecentLogs(RecentLogsHandle),
    Pipeline(PipelineHandle),
    /// Workers registered for uniqueness or termination only.
    Opaque,
}

/// Registry entry: the worker's handle plus its cancellation token.
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub handle: WorkerHandle,
    pub cancel: CancellationToken,
}

/// Callback invoked by an adaptor subscription on dispatch. Must hand
/// off to the adaptor's own workers and return quickly.
pub type IngestFn = Arc<dyn Fn(Vec<LogEvent>) + Send + Sync>;

/// A dispatcher subscription: the subscribing worker's name plus its
/// ingest callback.
#[derive(Clone)]
pub struct Subscription {
    pub key: WorkerKey,
    pub ingest: IngestFn,
}

/// Concurrent name → handle map plus dispatcher subscriptions.
#[derive(Default)]
pub struct Registry {
    names: DashMap<WorkerKey, WorkerEntry>,
    subscriptions: DashMap<SourceId, Vec<Subscription>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `entry` under `key`. Repeated registration of the same
    /// name fails with [`Error::AlreadyStarted`].
    pub fn register(&self, key: WorkerKey, entry: WorkerEntry) -> Result<(), Error> {
        match self.names.entry(key) {
            Entry::Occupied(_) => Err(Error::AlreadyStarted),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Registers `entry` under `key`, replacing any previous
    /// registration. Used by supervisors when respawning a child; the
    /// previous entry (if any) is returned so it can be torn down.
    pub fn reregister(&self, key: WorkerKey, entry: WorkerEntry) -> Option<WorkerEntry> {
        self.names.insert(key, entry)
    }

    #[must_use]
    pub fn lookup(&self, key: &WorkerKey) -> Option<WorkerEntry> {
        self.names.get(key).map(|entry| entry.clone())
    }

    pub fn unregister(&self, key: &WorkerKey) -> Option<WorkerEntry> {
        self.names.remove(key).map(|(_, entry)| entry)
    }

    /// Adds a dispatcher subscription for `source_id`.
    pub fn subscribe(&self, source_id: SourceId, subscription: Subscription) {
        self.subscriptions
            .entry(source_id)
            .or_default()
            .push(subscription);
    }

    /// Removes the subscription registered under `key`, if any.
    pub fn unsubscribe(&self, source_id: SourceId, key: &WorkerKey) {
        if let Some(mut subs) = self.subscriptions.get_mut(&source_id) {
            subs.retain(|sub| sub.key != *key);
        }
    }

    /// Visits every subscription registered under `source_id`.
    ///
    /// The visitor sees a snapshot taken at call time; subscriptions
    /// whose name was unregistered after the snapshot are skipped.
    pub fn dispatch<F>(&self, source_id: SourceId, mut visit: F)
    where
        F: FnMut(&Subscription),
    {
        let snapshot: Vec<Subscription> = self
            .subscriptions
            .get(&source_id)
            .map(|subs| subs.clone())
            .unwrap_or_default();

        for subscription in &snapshot {
            if self.names.contains_key(&subscription.key) {
                visit(subscription);
            }
        }
    }

    /// Removes every name and subscription owned by `source_id`.
    pub fn unregister_source(&self, source_id: SourceId) {
        let keys: Vec<WorkerKey> = self
            .names
            .iter()
            .filter(|entry| entry.key().source_id() == source_id)
            .map(|entry| *entry.key())
            .collect();
        for key in keys {
            self.names.remove(&key);
        }
        self.subscriptions.remove(&source_id);
    }

    /// Typed lookup of the source's buffer handle.
    #[must_use]
    pub fn buffer(&self, source_id: SourceId) -> Option<BufferHandle> {
        match self.lookup(&WorkerKey::role(source_id, Role::Buffer))? {
            WorkerEntry {
                handle: WorkerHandle::Buffer(handle),
                ..
            } => Some(handle),
            _ => None,
        }
    }

    /// Typed lookup of the source's recent-logs handle.
    #[must_use]
    pub fn recent(&self, source_id: SourceId) -> Option<RecentLogsHandle> {
        match self.lookup(&WorkerKey::role(source_id, Role::RecentLogs))? {
            WorkerEntry {
                handle: WorkerHandle::RecentLogs(handle),
                ..
            } => Some(handle),
            _ => None,
        }
    }

    /// Typed lookup of the source's pipeline handle.
    #[must_use]
    pub fn pipeline(&self, source_id: SourceId) -> Option<PipelineHandle> {
        match self.lookup(&WorkerKey::role(source_id, Role::Pipeline))? {
            WorkerEntry {
                handle: WorkerHandle::Pipeline(handle),
                ..
            } => Some(handle),
            _ => None,
        }
    }

    /// Whether the source has a running supervisor.
    #[must_use]
    pub fn started(&self, source_id: SourceId) -> bool {
        self.names
            .contains_key(&WorkerKey::role(source_id, Role::Supervisor))
    }
}
