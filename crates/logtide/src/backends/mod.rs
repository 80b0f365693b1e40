//! Backend adaptors: pluggable sinks receiving event batches.
//!
//! An adaptor owns batching, retries, and backpressure internally; the
//! dispatcher only hands batches to its registered ingest callback and
//! never observes delivery failures. The adaptor table is the
//! compile-time mapping from a backend's type tag to its
//! implementation — unknown tags reject configuration before a
//! `SourceBackend` row can be stored.

pub mod webhook;

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ConfigErrors, Error};
use crate::registry::Registry;
use crate::source::SourceBackend;

/// The adaptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptor {
    /// POSTs JSON arrays of event bodies to a configured URL.
    Webhook,
}

impl Adaptor {
    /// Looks up an adaptor by its type tag.
    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Adaptor> {
        match kind {
            webhook::KIND => Some(Adaptor::Webhook),
            _ => None,
        }
    }

    /// The adaptor's type tag.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Adaptor::Webhook => webhook::KIND,
        }
    }

    /// Coerces a raw string-keyed configuration into the adaptor's
    /// typed form. Errors are bare `(field, message)` pairs.
    pub fn cast_config(self, raw: &Map<String, Value>) -> Result<AdaptorConfig, ConfigErrors> {
        match self {
            Adaptor::Webhook => webhook::WebhookConfig::cast(raw).map(AdaptorConfig::Webhook),
        }
    }

    /// Runs full validation. Errors carry the `config.` field prefix
    /// for surfacing on the owning `SourceBackend`.
    pub fn cast_and_validate_config(
        self,
        raw: &Map<String, Value>,
    ) -> Result<AdaptorConfig, ConfigErrors> {
        let typed = self.cast_config(raw).map_err(ConfigErrors::prefixed)?;
        typed.validate().map_err(ConfigErrors::prefixed)?;
        Ok(typed)
    }

    /// Starts the adaptor's worker for `backend` and registers it on
    /// the registry under the source's dispatcher key.
    pub fn start(
        self,
        backend: &SourceBackend,
        config: &Arc<Config>,
        registry: &Arc<Registry>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, Error> {
        match self {
            Adaptor::Webhook => webhook::start(backend, config, registry, cancel),
        }
    }
}

/// Typed adaptor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdaptorConfig {
    Webhook(webhook::WebhookConfig),
}

impl AdaptorConfig {
    fn validate(&self) -> Result<(), ConfigErrors> {
        match self {
            AdaptorConfig::Webhook(config) => config.validate(),
        }
    }
}

/// Validates a backend row against the adaptor table. A row whose type
/// is unknown or whose configuration fails validation cannot be stored.
pub fn validate_backend(backend: &SourceBackend) -> Result<(), Error> {
    let adaptor = Adaptor::from_kind(&backend.kind)
        .ok_or_else(|| Error::UnknownBackendType(backend.kind.clone()))?;
    adaptor
        .cast_and_validate_config(&backend.config)
        .map_err(Error::InvalidConfig)?;
    Ok(())
}
