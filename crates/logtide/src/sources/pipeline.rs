//! Per-source ingestion pipeline.
//!
//! Normalizes raw parameters into events, applies the source's drop and
//! routing rules, and broadcasts survivors: into the memory buffer,
//! into the recent-logs cache, onto the source's channel topic, and
//! through the dispatcher to every subscribed backend adaptor.
//!
//! Rules are compiled once when the worker starts. Routed events are
//! re-ingested into the sink's pipeline with rule evaluation disabled,
//! which caps routing depth at one hop. Normalization is total: raw
//! mappings without a usable message are logged and counted, never
//! raised, and `ingest` always succeeds once the batch is enqueued.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::event::{now_micros, LogEvent};
use crate::pubsub::{ChannelMessage, Shards};
use crate::registry::Registry;
use crate::rules::CompiledRules;
use crate::source::{Source, SourceToken};
use crate::sources::{dispatcher, rpc};
use crate::store::SourceStore;

/// Commands accepted by the pipeline worker.
#[derive(Debug)]
pub enum PipelineCommand {
    /// Normalize and broadcast a batch of raw events.
    Ingest {
        raw: Vec<Map<String, Value>>,
        rules_enabled: bool,
    },
    /// Replies once every previously enqueued batch is fully processed.
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to a pipeline worker.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineCommand>,
    reply_timeout: Duration,
}

impl PipelineHandle {
    /// Enqueues a raw batch with rule evaluation enabled. Returns once
    /// the batch is enqueued; the caller is never suspended past that.
    pub fn ingest(&self, raw: Vec<Map<String, Value>>) -> Result<(), Error> {
        self.send(raw, true)
    }

    /// Re-ingests routed events with rule evaluation disabled.
    pub(crate) fn ingest_routed(&self, raw: Vec<Map<String, Value>>) -> Result<(), Error> {
        self.send(raw, false)
    }

    fn send(&self, raw: Vec<Map<String, Value>>, rules_enabled: bool) -> Result<(), Error> {
        self.tx
            .send(PipelineCommand::Ingest { raw, rules_enabled })
            .map_err(|_| Error::WorkerUnavailable("pipeline"))
    }

    /// Waits until previously enqueued batches are fully processed.
    pub async fn flushed(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::Flush(reply))
            .map_err(|_| Error::WorkerUnavailable("pipeline"))?;
        rpc(rx, self.reply_timeout, "pipeline").await
    }
}

/// The pipeline worker.
pub struct PipelineService {
    source: Arc<Source>,
    rules: CompiledRules,
    registry: Arc<Registry>,
    shards: Arc<Shards>,
    store: Arc<dyn SourceStore>,
    config: Arc<Config>,
    last_ts: u64,
    rejected: u64,
    rx: mpsc::UnboundedReceiver<PipelineCommand>,
    cancel: CancellationToken,
}

impl PipelineService {
    #[must_use]
    pub fn new(
        source: Arc<Source>,
        config: Arc<Config>,
        registry: Arc<Registry>,
        shards: Arc<Shards>,
        store: Arc<dyn SourceStore>,
        cancel: CancellationToken,
    ) -> (Self, PipelineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rules = CompiledRules::compile(&source);
        let reply_timeout = config.reply_timeout;

        let service = PipelineService {
            source,
            rules,
            registry,
            shards,
            store,
            config,
            last_ts: 0,
            rejected: 0,
            rx,
            cancel,
        };
        (service, PipelineHandle { tx, reply_timeout })
    }

    /// Processes batches until cancellation, draining whatever is still
    /// queued before stopping.
    pub async fn run(mut self) {
        debug!(source = %self.source.token, "pipeline started");
        loop {
            tokio::select! {
                Some(command) = self.rx.recv() => self.handle(command).await,
                () = self.cancel.cancelled() => {
                    while let Ok(command) = self.rx.try_recv() {
                        self.handle(command).await;
                    }
                    debug!(source = %self.source.token, "pipeline shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Ingest { raw, rules_enabled } => {
                self.ingest(raw, rules_enabled).await;
            }
            PipelineCommand::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn ingest(&mut self, raw: Vec<Map<String, Value>>, rules_enabled: bool) {
        if raw.is_empty() {
            return;
        }

        let mut kept: Vec<LogEvent> = Vec::with_capacity(raw.len());
        for params in raw {
            let ingested_at = self.next_ts();
            match LogEvent::make(params, self.source.token, ingested_at) {
                Ok(event) => {
                    if let Some(drop_expr) = &self.rules.drop {
                        if drop_expr.matches(&event) {
                            // matching events are discarded silently
                            continue;
                        }
                    }
                    kept.push(event);
                }
                Err(err) => {
                    self.rejected += 1;
                    warn!(
                        source = %self.source.token,
                        %err,
                        rejected = self.rejected,
                        "rejected event at normalization"
                    );
                }
            }
        }

        if rules_enabled {
            for route in &self.rules.routes {
                let matched: Vec<Map<String, Value>> = kept
                    .iter()
                    .filter(|event| route.expr.matches(event))
                    .map(|event| event.body.clone())
                    .collect();
                if !matched.is_empty() {
                    self.route(route.sink, matched).await;
                }
            }
        }

        if kept.is_empty() {
            return;
        }

        if let Some(recent) = self.registry.recent(self.source.id) {
            if recent.push(kept.clone()).is_err() {
                warn!(source = %self.source.token, "recent-logs cache unavailable");
            }
        }

        for event in &kept {
            self.shards.publish_channel(
                self.source.token,
                ChannelMessage::NewEvent {
                    event: event.clone(),
                },
            );
        }

        match self.registry.buffer(self.source.id) {
            Some(buffer) => {
                if buffer.add_many(kept.clone()).is_err() {
                    warn!(source = %self.source.token, "buffer unavailable, dispatching directly");
                    dispatcher::dispatch(&self.registry, self.source.id, &kept);
                    return;
                }
                loop {
                    let batch = match buffer.pop_many(self.config.webhook_batch_limit).await {
                        Ok(batch) if batch.is_empty() => break,
                        Ok(batch) => batch,
                        Err(_) => break,
                    };
                    dispatcher::dispatch(&self.registry, self.source.id, &batch);
                }
            }
            None => {
                warn!(source = %self.source.token, "buffer missing, dispatching directly");
                dispatcher::dispatch(&self.registry, self.source.id, &kept);
            }
        }
    }

    /// Routes matching events into the sink source with rules disabled.
    /// The original events still flow to this source's own backends.
    async fn route(&self, sink: SourceToken, bodies: Vec<Map<String, Value>>) {
        let Some(sink_source) = self.store.get_source_by_token(sink).await else {
            warn!(source = %self.source.token, %sink, "route sink not found");
            return;
        };
        let Some(pipeline) = self.registry.pipeline(sink_source.id) else {
            warn!(source = %self.source.token, %sink, "route sink not running");
            return;
        };
        if pipeline.ingest_routed(bodies).is_err() {
            warn!(source = %self.source.token, %sink, "route sink pipeline unavailable");
        }
    }

    /// Per-source monotonic timestamp in microseconds.
    fn next_ts(&mut self) -> u64 {
        let ts = now_micros().max(self.last_ts + 1);
        self.last_ts = ts;
        ts
    }
}
