//! Error types for the runtime.
//!
//! Lifecycle operations return tagged errors (`AlreadyStarted`,
//! `NotStarted`); configuration validation surfaces `(field, message)`
//! pairs; transport failures are absorbed by the cluster aggregator's
//! local fallback and only reach callers when no fallback exists.

use std::fmt;

use thiserror::Error;

/// Validation failures for a backend configuration.
///
/// Each entry is a `(field, message)` pair. When surfaced on the owning
/// `SourceBackend` the field names carry the `config.` prefix, e.g.
/// `("config.url", "is required")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<(String, String)>);

impl ConfigErrors {
    /// A single `(field, message)` error.
    #[must_use]
    pub fn single(field: &str, message: &str) -> Self {
        ConfigErrors(vec![(field.to_owned(), message.to_owned())])
    }

    /// Prefixes every field with `config.` for surfacing on the outer
    /// `SourceBackend`.
    #[must_use]
    pub fn prefixed(self) -> Self {
        ConfigErrors(
            self.0
                .into_iter()
                .map(|(field, message)| (format!("config.{field}"), message))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{field} {message}"))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Errors returned by runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker name is already registered (supervisor start races,
    /// repeated registration).
    #[error("already started")]
    AlreadyStarted,

    /// The source has no running supervisor.
    #[error("not started")]
    NotStarted,

    /// The backend type tag is not present in the adaptor table.
    #[error("unknown backend type: {0}")]
    UnknownBackendType(String),

    /// Backend configuration failed validation.
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(ConfigErrors),

    /// No source exists for the given id or token.
    #[error("source not found")]
    SourceNotFound,

    /// A worker's command channel is closed.
    #[error("{0} worker unavailable")]
    WorkerUnavailable(&'static str),

    /// A request/reply call exceeded the reply deadline.
    #[error("request timed out")]
    Timeout,

    /// Cluster transport failure (peer unreachable, peer crash).
    #[error("transport failure: {0}")]
    Transport(String),
}
