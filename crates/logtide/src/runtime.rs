//! Shared runtime context.
//!
//! One [`Runtime`] per node wires the process registry, the pub/sub
//! shards, the advisory locks, and the external store together. Every
//! worker holds an `Arc<Runtime>`; there is no further global state.

use std::sync::Arc;

use crate::config::Config;
use crate::locks::AdvisoryLocks;
use crate::pubsub::{NodeId, Shards};
use crate::registry::Registry;
use crate::store::SourceStore;

/// Node-wide context shared by all per-source workers.
pub struct Runtime {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub shards: Arc<Shards>,
    pub store: Arc<dyn SourceStore>,
    pub locks: Arc<AdvisoryLocks>,
    pub node_id: NodeId,
}

impl Runtime {
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn SourceStore>,
        node_id: impl Into<NodeId>,
    ) -> Arc<Self> {
        let shards = Arc::new(Shards::new(config.pool_size));
        Arc::new(Runtime {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            shards,
            store,
            locks: Arc::new(AdvisoryLocks::new()),
            node_id: node_id.into(),
        })
    }
}
