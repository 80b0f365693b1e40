//! Per-source workers.
//!
//! Each active source owns an independently schedulable set of workers:
//! a memory buffer, a recent-logs cache, an ingestion pipeline, and one
//! delivery worker per configured backend, all supervised one-for-one.
//! Workers are actor-style services: a `Service` struct owns the state
//! and a cloneable `Handle` talks to it over a channel.

pub mod buffer;
pub mod cluster;
pub mod dispatcher;
pub mod pipeline;
pub mod recent;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::Error;
use crate::runtime::Runtime;
use crate::source::Source;

/// Awaits an RPC-style reply within the configured deadline.
pub(crate) async fn rpc<T>(
    rx: oneshot::Receiver<T>,
    deadline: Duration,
    worker: &'static str,
) -> Result<T, Error> {
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(Error::WorkerUnavailable(worker)),
        Err(_) => Err(Error::Timeout),
    }
}

/// Ingests a batch of raw events for `source`.
///
/// The source's workers are created on the first ingest after it
/// becomes active; afterwards the batch is enqueued on the pipeline and
/// the call returns without waiting for processing. Dropped or failed
/// events are logged and counted downstream but never fail the caller.
pub async fn ingest_logs(
    runtime: &Arc<Runtime>,
    source: &Source,
    raw: Vec<Map<String, Value>>,
) -> Result<(), Error> {
    if !runtime.registry.started(source.id) {
        match supervisor::start(runtime, source).await {
            Ok(()) | Err(Error::AlreadyStarted) => {}
            Err(err) => return Err(err),
        }
    }

    let pipeline = runtime
        .registry
        .pipeline(source.id)
        .ok_or(Error::WorkerUnavailable("pipeline"))?;
    pipeline.ingest(raw)
}
