//! # logtide
//!
//! Per-source log ingestion and live-tail runtime.
//!
//! For every active log source the runtime maintains a supervised set of
//! workers that ingest, validate, route, and forward log events to one or
//! more backends, plus a short in-memory window of the most recent events
//! that can be queried both locally and across a cluster of nodes.
//!
//! ## Architecture
//!
//! ```text
//!   ingest_logs(raw, source)
//!        │
//!        v
//!   ┌────────────┐   route (1 hop)   ┌────────────┐
//!   │  Pipeline  │ ────────────────> │  sink      │
//!   │ (per src)  │                   │  Pipeline  │
//!   └─────┬──────┘                   └────────────┘
//!         │ normalize, drop-filter
//!         v
//!   ┌──────────┐  ┌─────────────┐  ┌────────────┐
//!   │  Buffer  │  │ RecentLogs  │  │ Dispatcher │
//!   │ (FIFO)   │  │ (cache,100) │  │  (fan-out) │
//!   └──────────┘  └──────┬──────┘  └─────┬──────┘
//!                        │               │
//!                        v               v
//!                  sharded pub/sub   backend adaptors
//! ```
//!
//! The library is organized into several key modules:
//! - [`sources`]: the per-source workers (pipeline, cache, buffer,
//!   dispatcher, supervisor, cluster queries)
//! - [`backends`]: pluggable sink adaptors (webhook)
//! - [`registry`]: process registry mapping worker names to handles
//! - [`pubsub`]: sharded insert-count topics and per-source channels
//! - [`store`]: persistence contract with the external store
//!
//! The crate is library-shaped: there is no CLI, and callers install their
//! own `tracing` subscriber.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

/// Backend adaptors: pluggable sinks receiving event batches
pub mod backends;

/// Runtime configuration
pub mod config;

/// Error types
pub mod error;

/// Log events and normalization
pub mod event;

/// Advisory locks guarding lazy worker starts
pub mod locks;

/// Sharded pub/sub topics
pub mod pubsub;

/// Process registry: worker names and dispatcher subscriptions
pub mod registry;

/// Compiled drop and routing rules
pub mod rules;

/// Shared runtime context
pub mod runtime;

/// Sources, rules, and backend rows
pub mod source;

/// Per-source workers
pub mod sources;

/// Persistence contract with the external store
pub mod store;

pub use config::Config;
pub use error::Error;
pub use runtime::Runtime;
pub use sources::ingest_logs;
