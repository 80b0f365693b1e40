//! Per-source recent-logs cache.
//!
//! Keeps the last [`RECENT_CAPACITY`] events of a source in insertion
//! order plus the single latest event, and owns the source's insert
//! counters. Two timers run alongside command processing:
//!
//! 1. **Broadcast** every `broadcast_interval`: if the node's insert
//!    counter grew, the per-node counts are published on the source's
//!    insert shard; if the cluster-wide total grew, a `log_count`
//!    payload is published on the source's channel topic.
//! 2. **Touch** every `touch_interval` plus uniform jitter: if the
//!    newest non-system event is younger than `touch_max_age`, the
//!    source's `log_events_updated_at` is updated in the external
//!    store.
//!
//! On boot the cache posts a single synthetic system event announcing
//! the node. Remote counters arrive over the insert shard and are
//! merged per node, so the cached cluster total converges without any
//! coordination beyond pub/sub.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::event::{now_micros, LogEvent};
use crate::pubsub::{ChannelMessage, InsertsMessage, NodeCounts, NodeId, Shards};
use crate::source::Source;
use crate::sources::rpc;
use crate::store::SourceStore;

/// Cache capacity per source.
pub const RECENT_CAPACITY: usize = 100;

/// Snapshot of the cache's insert counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    /// Events inserted on this node since the worker booted.
    pub inserts_since_boot: u64,
    /// Cluster-wide insert total, as currently cached.
    pub total_cluster_inserts: u64,
}

/// Commands accepted by the cache worker.
#[derive(Debug)]
pub enum RecentCommand {
    /// Append events in order, evicting the oldest when full.
    Push(Vec<LogEvent>),
    /// Current contents in insertion order.
    List(oneshot::Sender<Vec<LogEvent>>),
    /// The most recent push, tracked across evictions.
    Latest(oneshot::Sender<Option<LogEvent>>),
    /// Counter snapshot.
    Counters(oneshot::Sender<CacheCounters>),
}

/// Cloneable handle to a cache worker.
#[derive(Debug, Clone)]
pub struct RecentLogsHandle {
    tx: mpsc::UnboundedSender<RecentCommand>,
    reply_timeout: Duration,
}

impl RecentLogsHandle {
    /// Non-blocking append.
    pub fn push(&self, events: Vec<LogEvent>) -> Result<(), Error> {
        self.tx
            .send(RecentCommand::Push(events))
            .map_err(|_| Error::WorkerUnavailable("recent_logs"))
    }

    /// Current contents in insertion order.
    pub async fn list(&self) -> Result<Vec<LogEvent>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecentCommand::List(reply))
            .map_err(|_| Error::WorkerUnavailable("recent_logs"))?;
        rpc(rx, self.reply_timeout, "recent_logs").await
    }

    /// The most recent event, `None` while nothing has been pushed.
    pub async fn latest(&self) -> Result<Option<LogEvent>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecentCommand::Latest(reply))
            .map_err(|_| Error::WorkerUnavailable("recent_logs"))?;
        rpc(rx, self.reply_timeout, "recent_logs").await
    }

    /// Counter snapshot.
    pub async fn counters(&self) -> Result<CacheCounters, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecentCommand::Counters(reply))
            .map_err(|_| Error::WorkerUnavailable("recent_logs"))?;
        rpc(rx, self.reply_timeout, "recent_logs").await
    }
}

/// The cache worker.
pub struct RecentLogsService {
    source: Arc<Source>,
    events: VecDeque<LogEvent>,
    latest: Option<LogEvent>,
    inserts_since_boot: u64,
    published_inserts: u64,
    published_total: u64,
    remote_counts: HashMap<NodeId, NodeCounts>,
    rx: mpsc::UnboundedReceiver<RecentCommand>,
    shard_rx: broadcast::Receiver<InsertsMessage>,
    shards: Arc<Shards>,
    store: Arc<dyn SourceStore>,
    config: Arc<Config>,
    node_id: NodeId,
    cancel: CancellationToken,
}

impl RecentLogsService {
    #[must_use]
    pub fn new(
        source: Arc<Source>,
        config: Arc<Config>,
        shards: Arc<Shards>,
        store: Arc<dyn SourceStore>,
        node_id: NodeId,
        cancel: CancellationToken,
    ) -> (Self, RecentLogsHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shard_rx = shards.subscribe_source_shard(source.id);
        let reply_timeout = config.reply_timeout;

        let service = RecentLogsService {
            source,
            events: VecDeque::with_capacity(RECENT_CAPACITY),
            latest: None,
            inserts_since_boot: 0,
            published_inserts: 0,
            published_total: 0,
            remote_counts: HashMap::new(),
            rx,
            shard_rx,
            shards,
            store,
            config,
            node_id,
            cancel,
        };
        (service, RecentLogsHandle { tx, reply_timeout })
    }

    /// Processes commands and timers until cancellation.
    pub async fn run(mut self) {
        debug!(source = %self.source.token, "recent-logs cache started");

        let boot = LogEvent::system(
            self.source.token,
            now_micros(),
            &format!("Initialized on node {}", self.node_id),
        );
        self.insert(vec![boot]);

        let start = tokio::time::Instant::now();
        let mut broadcast_tick = tokio::time::interval_at(
            start + self.config.broadcast_interval,
            self.config.broadcast_interval,
        );
        let touch_every = self.config.touch_interval + touch_jitter(self.config.touch_jitter_max);
        let mut touch_tick = tokio::time::interval_at(start + touch_every, touch_every);

        loop {
            tokio::select! {
                Some(command) = self.rx.recv() => self.handle(command),
                _ = broadcast_tick.tick() => self.broadcast(),
                _ = touch_tick.tick() => self.touch().await,
                received = self.shard_rx.recv() => match received {
                    Ok(message) => self.merge_remote(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(source = %self.source.token, skipped, "lagged on insert shard");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                () = self.cancel.cancelled() => {
                    debug!(source = %self.source.token, "recent-logs cache shutting down");
                    break;
                }
            }
        }
    }

    fn handle(&mut self, command: RecentCommand) {
        match command {
            RecentCommand::Push(events) => self.insert(events),
            RecentCommand::List(reply) => {
                let _ = reply.send(self.events.iter().cloned().collect());
            }
            RecentCommand::Latest(reply) => {
                let _ = reply.send(self.latest.clone());
            }
            RecentCommand::Counters(reply) => {
                let _ = reply.send(CacheCounters {
                    inserts_since_boot: self.inserts_since_boot,
                    total_cluster_inserts: self.cluster_total(),
                });
            }
        }
    }

    fn insert(&mut self, events: Vec<LogEvent>) {
        for event in events {
            if self.events.len() >= RECENT_CAPACITY {
                self.events.pop_front();
            }
            self.inserts_since_boot += 1;
            self.latest = Some(event.clone());
            self.events.push_back(event);
        }
    }

    /// Cluster-wide total: this node's live counter plus the last
    /// counts received from every other node.
    fn cluster_total(&self) -> u64 {
        let remote: u64 = self
            .remote_counts
            .iter()
            .filter(|(node, _)| **node != self.node_id)
            .map(|(_, counts)| counts.node_inserts)
            .sum();
        self.inserts_since_boot + remote
    }

    fn broadcast(&mut self) {
        if self.inserts_since_boot > self.published_inserts {
            self.published_inserts = self.inserts_since_boot;

            let mut counts = self.remote_counts.clone();
            counts.insert(
                self.node_id.clone(),
                NodeCounts {
                    node_inserts: self.inserts_since_boot,
                    bq_inserts: self.inserts_since_boot,
                },
            );
            self.shards.publish_inserts(InsertsMessage {
                source_id: self.source.id,
                counts,
            });
        }

        let total = self.cluster_total();
        if total > self.published_total {
            self.published_total = total;
            self.shards
                .publish_channel(self.source.token, ChannelMessage::LogCount { count: total });
        }
    }

    fn merge_remote(&mut self, message: &InsertsMessage) {
        if message.source_id != self.source.id {
            return;
        }
        for (node, counts) in &message.counts {
            if *node == self.node_id {
                continue;
            }
            let known = self.remote_counts.entry(node.clone()).or_default();
            if counts.node_inserts > known.node_inserts {
                *known = *counts;
            }
        }
    }

    async fn touch(&self) {
        let newest = self.events.iter().rev().find(|event| !event.is_system());
        let Some(event) = newest else { return };

        let max_age = u64::try_from(self.config.touch_max_age.as_micros()).unwrap_or(u64::MAX);
        let now = now_micros();
        if now.saturating_sub(event.ingested_at) < max_age {
            self.store
                .touch_log_events_updated_at(self.source.id, now)
                .await;
            debug!(source = %self.source.token, "touched log_events_updated_at");
        }
    }
}

fn touch_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}
