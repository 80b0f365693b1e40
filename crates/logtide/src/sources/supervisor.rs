//! Per-source supervision.
//!
//! Starts and stops the full worker set of a source: memory buffer,
//! recent-logs cache, pipeline, and one delivery worker per configured
//! backend. The restart strategy is one-for-one: every child runs under
//! its own guardian task that respawns only that child when it dies.
//!
//! `start` registers the supervisor name optimistically, so concurrent
//! starts of the same source yield exactly one running supervisor and
//! the losers observe [`Error::AlreadyStarted`]. `stop` cancels the
//! root token and sweeps every name the source owns.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::Adaptor;
use crate::error::Error;
use crate::registry::{Role, WorkerEntry, WorkerHandle, WorkerKey};
use crate::runtime::Runtime;
use crate::source::{Source, SourceId};
use crate::sources::buffer::BufferService;
use crate::sources::pipeline::PipelineService;
use crate::sources::recent::{RecentLogsHandle, RecentLogsService};
use crate::store::SourceStore;

/// Scope tag of the advisory lock taken around lazy cache starts.
const RECENT_LOGS_LOCK: &str = "recent_logs";

/// Starts the source's worker set. Idempotent: a second start observes
/// [`Error::AlreadyStarted`] and changes nothing.
pub async fn start(runtime: &Arc<Runtime>, source: &Source) -> Result<(), Error> {
    let root = CancellationToken::new();
    runtime.registry.register(
        WorkerKey::role(source.id, Role::Supervisor),
        WorkerEntry {
            handle: WorkerHandle::Opaque,
            cancel: root.clone(),
        },
    )?;

    let source = Arc::new(source.clone());
    match start_children(runtime, &source, &root).await {
        Ok(()) => {
            debug!(source = %source.token, "source workers started");
            Ok(())
        }
        Err(err) => {
            root.cancel();
            runtime.registry.unregister_source(source.id);
            Err(err)
        }
    }
}

/// Stops the source's workers by handle from the registry.
pub fn stop(runtime: &Arc<Runtime>, source_id: SourceId) -> Result<(), Error> {
    let Some(entry) = runtime
        .registry
        .unregister(&WorkerKey::role(source_id, Role::Supervisor))
    else {
        return Err(Error::NotStarted);
    };

    entry.cancel.cancel();
    runtime.registry.unregister_source(source_id);
    debug!(%source_id, "source workers stopped");
    Ok(())
}

/// `stop` followed by `start`; fails with [`Error::NotStarted`] when the
/// source was not running.
pub async fn restart(runtime: &Arc<Runtime>, source: &Source) -> Result<(), Error> {
    stop(runtime, source.id)?;
    start(runtime, source).await
}

/// Whether the source has a running supervisor.
#[must_use]
pub fn started(runtime: &Arc<Runtime>, source_id: SourceId) -> bool {
    runtime.registry.started(source_id)
}

/// Returns the source's recent-logs handle, starting the cache lazily
/// under a cluster-wide advisory lock when no supervisor started it.
/// The lock is released as soon as the child-start call returns; losing
/// the registration race is treated as success.
pub async fn ensure_recent_logs(
    runtime: &Arc<Runtime>,
    source: &Source,
) -> Result<RecentLogsHandle, Error> {
    if let Some(handle) = runtime.registry.recent(source.id) {
        return Ok(handle);
    }

    let _guard = runtime
        .locks
        .acquire((RECENT_LOGS_LOCK, source.id))
        .await;

    if let Some(handle) = runtime.registry.recent(source.id) {
        return Ok(handle);
    }

    let cancel = CancellationToken::new();
    let (service, handle) = RecentLogsService::new(
        Arc::new(source.clone()),
        Arc::clone(&runtime.config),
        Arc::clone(&runtime.shards),
        Arc::clone(&runtime.store),
        runtime.node_id.clone(),
        cancel.clone(),
    );

    match runtime.registry.register(
        WorkerKey::role(source.id, Role::RecentLogs),
        WorkerEntry {
            handle: WorkerHandle::RecentLogs(handle.clone()),
            cancel,
        },
    ) {
        Ok(()) => {
            tokio::spawn(service.run());
            debug!(source = %source.token, "recent-logs cache started lazily");
            Ok(handle)
        }
        Err(_) => runtime
            .registry
            .recent(source.id)
            .ok_or(Error::WorkerUnavailable("recent_logs")),
    }
}

async fn start_children(
    runtime: &Arc<Runtime>,
    source: &Arc<Source>,
    root: &CancellationToken,
) -> Result<(), Error> {
    // a lazily started cache is superseded by the supervised one
    if let Some(old) = runtime
        .registry
        .unregister(&WorkerKey::role(source.id, Role::RecentLogs))
    {
        old.cancel.cancel();
    }

    spawn_supervised("buffer", root, buffer_factory(runtime, source, root));
    spawn_supervised("recent_logs", root, recent_factory(runtime, source, root));
    spawn_supervised("pipeline", root, pipeline_factory(runtime, source, root));

    for row in runtime.store.list_backends(source.id).await {
        let Some(adaptor) = Adaptor::from_kind(&row.kind) else {
            warn!(source = %source.token, kind = %row.kind, "skipping unknown backend type");
            continue;
        };
        let cancel = root.child_token();
        match adaptor.start(&row, &runtime.config, &runtime.registry, cancel.clone()) {
            Ok(first) => {
                let registry = Arc::clone(&runtime.registry);
                let config = Arc::clone(&runtime.config);
                let factory = move || match adaptor.start(&row, &config, &registry, cancel.clone())
                {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(%err, "backend worker failed to restart");
                        let cancel = cancel.clone();
                        tokio::spawn(async move { cancel.cancelled().await })
                    }
                };
                supervise("backend", root.child_token(), first, factory);
            }
            Err(err) => {
                warn!(source = %source.token, backend = %row.id, %err, "backend worker failed to start");
            }
        }
    }

    Ok(())
}

fn spawn_supervised(
    worker: &'static str,
    root: &CancellationToken,
    factory: impl Fn() -> JoinHandle<()> + Send + 'static,
) {
    let first = factory();
    supervise(worker, root.child_token(), first, factory);
}

/// Guardian task implementing the one-for-one strategy: when its child
/// dies it respawns that child alone, until the token cancels.
fn supervise(
    worker: &'static str,
    cancel: CancellationToken,
    first: JoinHandle<()>,
    factory: impl Fn() -> JoinHandle<()> + Send + 'static,
) {
    tokio::spawn(async move {
        let mut child = first;
        loop {
            tokio::select! {
                result = child => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match result {
                        Ok(()) => warn!(worker, "worker exited unexpectedly, restarting"),
                        Err(err) if err.is_panic() => warn!(worker, "worker panicked, restarting"),
                        Err(_) => break,
                    }
                    child = factory();
                }
                () = cancel.cancelled() => break,
            }
        }
    });
}

fn buffer_factory(
    runtime: &Arc<Runtime>,
    source: &Arc<Source>,
    root: &CancellationToken,
) -> impl Fn() -> JoinHandle<()> + Send + 'static {
    let runtime = Arc::clone(runtime);
    let source = Arc::clone(source);
    let cancel = root.child_token();
    move || {
        let (service, handle) = BufferService::new(
            runtime.config.buffer_capacity,
            runtime.config.reply_timeout,
            cancel.clone(),
        );
        runtime.registry.reregister(
            WorkerKey::role(source.id, Role::Buffer),
            WorkerEntry {
                handle: WorkerHandle::Buffer(handle),
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(service.run())
    }
}

fn recent_factory(
    runtime: &Arc<Runtime>,
    source: &Arc<Source>,
    root: &CancellationToken,
) -> impl Fn() -> JoinHandle<()> + Send + 'static {
    let runtime = Arc::clone(runtime);
    let source = Arc::clone(source);
    let cancel = root.child_token();
    move || {
        let (service, handle) = RecentLogsService::new(
            Arc::clone(&source),
            Arc::clone(&runtime.config),
            Arc::clone(&runtime.shards),
            Arc::clone(&runtime.store),
            runtime.node_id.clone(),
            cancel.clone(),
        );
        runtime.registry.reregister(
            WorkerKey::role(source.id, Role::RecentLogs),
            WorkerEntry {
                handle: WorkerHandle::RecentLogs(handle),
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(service.run())
    }
}

fn pipeline_factory(
    runtime: &Arc<Runtime>,
    source: &Arc<Source>,
    root: &CancellationToken,
) -> impl Fn() -> JoinHandle<()> + Send + 'static {
    let runtime = Arc::clone(runtime);
    let source = Arc::clone(source);
    let cancel = root.child_token();
    move || {
        let (service, handle) = PipelineService::new(
            Arc::clone(&source),
            Arc::clone(&runtime.config),
            Arc::clone(&runtime.registry),
            Arc::clone(&runtime.shards),
            Arc::clone(&runtime.store),
            cancel.clone(),
        );
        runtime.registry.reregister(
            WorkerKey::role(source.id, Role::Pipeline),
            WorkerEntry {
                handle: WorkerHandle::Pipeline(handle),
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(service.run())
    }
}
