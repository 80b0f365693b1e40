//! Sharded pub/sub topics.
//!
//! Insert counters are published on `inserts:shard-<H>` where
//! `H = hash(source_id) mod pool_size`; each source additionally owns a
//! channel topic carrying `log_count` and `new_event` payloads for
//! live-tail consumers. Topics are `tokio::sync::broadcast` channels:
//! lagged receivers lose the oldest messages, which is acceptable for
//! counters and tail previews.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::event::LogEvent;
use crate::source::{SourceId, SourceToken};

/// Identifier of a cluster node.
pub type NodeId = String;

/// Buffered messages per topic before lagged receivers drop.
const TOPIC_CAPACITY: usize = 256;

/// Per-node insert counters carried in shard messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub node_inserts: u64,
    pub bq_inserts: u64,
}

/// Message published on `inserts:shard-<H>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertsMessage {
    pub source_id: SourceId,
    /// node → counters, as observed by the publishing node.
    pub counts: HashMap<NodeId, NodeCounts>,
}

/// Payloads published on a source's channel topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChannelMessage {
    /// The cluster-wide insert total grew.
    LogCount { count: u64 },
    /// A freshly ingested event.
    NewEvent { event: LogEvent },
}

/// The node's pub/sub topics: a fixed pool of insert shards plus
/// lazily created per-source channels.
pub struct Shards {
    pool_size: usize,
    inserts: Vec<broadcast::Sender<InsertsMessage>>,
    channels: DashMap<SourceToken, broadcast::Sender<ChannelMessage>>,
}

impl Shards {
    /// Creates the shard pool. `pool_size` is clamped to at least 1.
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let inserts = (0..pool_size)
            .map(|_| broadcast::channel(TOPIC_CAPACITY).0)
            .collect();
        Shards {
            pool_size,
            inserts,
            channels: DashMap::new(),
        }
    }

    /// The shard index a source's insert counts land on.
    #[must_use]
    pub fn shard_of(&self, source_id: SourceId) -> usize {
        let mut hasher = DefaultHasher::new();
        source_id.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.pool_size as u64).unwrap_or(0)
    }

    /// Publishes insert counters on the owning shard. Returns the
    /// number of live receivers.
    pub fn publish_inserts(&self, message: InsertsMessage) -> usize {
        let shard = self.shard_of(message.source_id);
        self.inserts[shard].send(message).unwrap_or(0)
    }

    /// Subscribes to the shard a source's counters land on.
    #[must_use]
    pub fn subscribe_source_shard(
        &self,
        source_id: SourceId,
    ) -> broadcast::Receiver<InsertsMessage> {
        self.inserts[self.shard_of(source_id)].subscribe()
    }

    /// Subscribes to a shard by index.
    ///
    /// # Panics
    ///
    /// Panics when `shard >= pool_size`.
    #[must_use]
    pub fn subscribe_shard(&self, shard: usize) -> broadcast::Receiver<InsertsMessage> {
        self.inserts[shard].subscribe()
    }

    /// Publishes on a source's channel topic. Returns the number of
    /// live receivers.
    pub fn publish_channel(&self, token: SourceToken, message: ChannelMessage) -> usize {
        self.channel(token).send(message).unwrap_or(0)
    }

    /// Subscribes to a source's channel topic.
    #[must_use]
    pub fn subscribe_channel(&self, token: SourceToken) -> broadcast::Receiver<ChannelMessage> {
        self.channel(token).subscribe()
    }

    fn channel(&self, token: SourceToken) -> broadcast::Sender<ChannelMessage> {
        self.channels
            .entry(token)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_of_is_stable_and_bounded() {
        let shards = Shards::new(4);
        for id in 0..64 {
            let shard = shards.shard_of(SourceId(id));
            assert!(shard < 4);
            assert_eq!(shard, shards.shard_of(SourceId(id)));
        }
    }

    #[test]
    fn test_pool_size_clamped_to_one() {
        let shards = Shards::new(0);
        assert_eq!(shards.shard_of(SourceId(1)), 0);
    }

    #[tokio::test]
    async fn test_publish_inserts_reaches_shard_subscriber() {
        let shards = Shards::new(2);
        let source_id = SourceId(42);
        let mut rx = shards.subscribe_source_shard(source_id);

        let message = InsertsMessage {
            source_id,
            counts: HashMap::from([(
                "node-a".to_owned(),
                NodeCounts {
                    node_inserts: 3,
                    bq_inserts: 3,
                },
            )]),
        };
        assert_eq!(shards.publish_inserts(message), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source_id, source_id);
        assert_eq!(received.counts["node-a"].node_inserts, 3);
    }

    #[tokio::test]
    async fn test_channel_topics_are_per_source() {
        let shards = Shards::new(1);
        let token_a = SourceToken::random();
        let token_b = SourceToken::random();

        let mut rx_a = shards.subscribe_channel(token_a);
        let mut rx_b = shards.subscribe_channel(token_b);

        shards.publish_channel(token_a, ChannelMessage::LogCount { count: 1 });

        let received = rx_a.recv().await.unwrap();
        assert!(matches!(received, ChannelMessage::LogCount { count: 1 }));
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let shards = Shards::new(1);
        let delivered = shards.publish_channel(
            SourceToken::random(),
            ChannelMessage::LogCount { count: 1 },
        );
        assert_eq!(delivered, 0);
    }
}
