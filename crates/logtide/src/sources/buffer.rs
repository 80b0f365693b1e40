//! Per-source memory buffer.
//!
//! A bounded FIFO between the pipeline's ingest side and its dispatch
//! side, addressed through the registry name `(source_id, Buffer)`.
//! `add_many` is non-blocking; when the queue is full the oldest
//! entries are evicted and counted as data loss. The pipeline is the
//! sole consumer.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::LogEvent;
use crate::sources::rpc;

/// Commands accepted by the buffer worker.
#[derive(Debug)]
pub enum BufferCommand {
    /// Append events in order, evicting the oldest on overflow.
    AddMany(Vec<LogEvent>),
    /// Remove and return up to `max` events from the front.
    PopMany {
        max: usize,
        reply: oneshot::Sender<Vec<LogEvent>>,
    },
    /// Current queue depth.
    Len(oneshot::Sender<usize>),
}

/// Cloneable handle to a buffer worker.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    tx: mpsc::UnboundedSender<BufferCommand>,
    reply_timeout: Duration,
}

impl BufferHandle {
    /// Non-blocking enqueue. Overflow policy is drop-oldest.
    pub fn add_many(&self, events: Vec<LogEvent>) -> Result<(), Error> {
        self.tx
            .send(BufferCommand::AddMany(events))
            .map_err(|_| Error::WorkerUnavailable("buffer"))
    }

    /// Removes and returns up to `max` events in FIFO order.
    pub async fn pop_many(&self, max: usize) -> Result<Vec<LogEvent>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BufferCommand::PopMany { max, reply })
            .map_err(|_| Error::WorkerUnavailable("buffer"))?;
        rpc(rx, self.reply_timeout, "buffer").await
    }

    /// Current queue depth.
    pub async fn len(&self) -> Result<usize, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BufferCommand::Len(reply))
            .map_err(|_| Error::WorkerUnavailable("buffer"))?;
        rpc(rx, self.reply_timeout, "buffer").await
    }
}

/// The buffer worker. Owns the queue; commands are processed in FIFO
/// order, so per-caller event order is preserved.
pub struct BufferService {
    queue: VecDeque<LogEvent>,
    capacity: usize,
    rx: mpsc::UnboundedReceiver<BufferCommand>,
    cancel: CancellationToken,
}

impl BufferService {
    #[must_use]
    pub fn new(
        capacity: usize,
        reply_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Self, BufferHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = BufferService {
            queue: VecDeque::new(),
            capacity,
            rx,
            cancel,
        };
        (service, BufferHandle { tx, reply_timeout })
    }

    /// Processes commands until cancellation.
    pub async fn run(mut self) {
        debug!("buffer worker started");
        loop {
            tokio::select! {
                Some(command) = self.rx.recv() => self.handle(command),
                () = self.cancel.cancelled() => {
                    debug!("buffer worker shutting down");
                    break;
                }
            }
        }
    }

    fn handle(&mut self, command: BufferCommand) {
        match command {
            BufferCommand::AddMany(events) => {
                let mut evicted = 0usize;
                for event in events {
                    if self.queue.len() >= self.capacity {
                        self.queue.pop_front();
                        evicted += 1;
                    }
                    self.queue.push_back(event);
                }
                if evicted > 0 {
                    warn!(
                        "buffer full ({} entries), dropped {evicted} oldest events",
                        self.capacity
                    );
                }
            }
            BufferCommand::PopMany { max, reply } => {
                let take = self.queue.len().min(max);
                let batch: Vec<LogEvent> = self.queue.drain(..take).collect();
                let _ = reply.send(batch);
            }
            BufferCommand::Len(reply) => {
                let _ = reply.send(self.queue.len());
            }
        }
    }
}
