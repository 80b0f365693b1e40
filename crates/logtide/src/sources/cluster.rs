//! Cluster-wide live-tail queries.
//!
//! `list_for_cluster` fans a list request out to every reachable peer's
//! recent-logs cache, collects replies under one hard deadline,
//! cancels stragglers, and merges the results with the local cache:
//! sorted ascending by the events' body timestamp and capped at the
//! cache capacity. Transport is a trait seam so tests and single-process
//! clusters run in-memory while deployments plug in their RPC layer.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::Error;
use crate::event::LogEvent;
use crate::pubsub::NodeId;
use crate::registry::Registry;
use crate::runtime::Runtime;
use crate::source::{Source, SourceId};
use crate::sources::recent::RECENT_CAPACITY;
use crate::sources::supervisor;

/// Peer enumeration and per-peer list requests.
///
/// `list_recent` must preserve the remote cache's reply and tolerate
/// being cancelled mid-flight; each call runs as its own task so a slow
/// peer never affects its siblings.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Reachable peers, not including this node.
    fn peers(&self) -> Vec<NodeId>;

    /// Lists the recent events a peer's cache holds for `source_id`.
    async fn list_recent(&self, peer: &NodeId, source_id: SourceId)
        -> Result<Vec<LogEvent>, Error>;
}

/// In-process transport over peer registries, for tests and
/// single-process clusters.
#[derive(Default)]
pub struct LocalCluster {
    peers: DashMap<NodeId, Arc<Registry>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new() -> Self {
        LocalCluster::default()
    }

    pub fn add_peer(&self, node_id: impl Into<NodeId>, registry: Arc<Registry>) {
        self.peers.insert(node_id.into(), registry);
    }
}

#[async_trait]
impl ClusterTransport for LocalCluster {
    fn peers(&self) -> Vec<NodeId> {
        self.peers.iter().map(|peer| peer.key().clone()).collect()
    }

    async fn list_recent(
        &self,
        peer: &NodeId,
        source_id: SourceId,
    ) -> Result<Vec<LogEvent>, Error> {
        let registry = self
            .peers
            .get(peer)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Transport(format!("unknown peer {peer}")))?;
        let recent = registry
            .recent(source_id)
            .ok_or_else(|| Error::Transport(format!("no cache for source on {peer}")))?;
        recent.list().await
    }
}

/// Live-tail query surface spanning the local node and its peers.
pub struct ClusterQuery {
    runtime: Arc<Runtime>,
    transport: Arc<dyn ClusterTransport>,
}

impl ClusterQuery {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, transport: Arc<dyn ClusterTransport>) -> Self {
        ClusterQuery { runtime, transport }
    }

    /// Local list. Starts the cache lazily when its supervisor did not.
    pub async fn list(&self, source: &Source) -> Result<Vec<LogEvent>, Error> {
        let handle = supervisor::ensure_recent_logs(&self.runtime, source).await?;
        handle.list().await
    }

    /// Cluster-wide list: local events merged with every peer that
    /// replies within the deadline, sorted ascending by body timestamp
    /// and capped at the newest [`RECENT_CAPACITY`].
    pub async fn list_for_cluster(&self, source: &Source) -> Result<Vec<LogEvent>, Error> {
        let mut requests = JoinSet::new();
        for peer in self.transport.peers() {
            let transport = Arc::clone(&self.transport);
            let source_id = source.id;
            requests.spawn(async move { transport.list_recent(&peer, source_id).await });
        }

        let mut merged: Vec<LogEvent> = Vec::new();
        let deadline = tokio::time::sleep(self.runtime.config.cluster_list_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = requests.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(events))) => merged.extend(events),
                    Some(Ok(Err(err))) => debug!(%err, "peer list failed"),
                    Some(Err(err)) => debug!(%err, "peer list task failed"),
                },
                () = &mut deadline => {
                    debug!(source = %source.token, "cluster list deadline hit, cancelling stragglers");
                    requests.abort_all();
                    break;
                }
            }
        }

        match self.list(source).await {
            Ok(local) => merged.extend(local),
            // peers already delivered something; otherwise surface it
            Err(err) if merged.is_empty() => return Err(err),
            Err(err) => debug!(%err, "local list failed, serving peer results"),
        }

        Ok(merge_sorted(merged))
    }

    /// Newest body timestamp observed on this node; 0 when no event has
    /// been observed.
    pub async fn latest_date(&self, source_id: SourceId) -> Result<u64, Error> {
        match self.runtime.registry.recent(source_id) {
            None => Ok(0),
            Some(handle) => Ok(handle
                .latest()
                .await?
                .map_or(0, |event| event.timestamp())),
        }
    }
}

fn merge_sorted(mut events: Vec<LogEvent>) -> Vec<LogEvent> {
    events.sort_by_key(LogEvent::timestamp);
    if events.len() > RECENT_CAPACITY {
        events.drain(..events.len() - RECENT_CAPACITY);
    }
    events
}
