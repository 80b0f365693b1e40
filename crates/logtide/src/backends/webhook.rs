//! Webhook adaptor: POSTs JSON arrays of event bodies to a URL.
//!
//! The worker owns a queue and a retry loop. Dispatch hands batches to
//! the worker over an unbounded channel and returns immediately; HTTP
//! failures are retried a bounded number of times and then dropped with
//! an error log. Client errors (4xx) are never retried.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{ConfigErrors, Error};
use crate::event::LogEvent;
use crate::registry::{Registry, Subscription, WorkerEntry, WorkerHandle, WorkerKey};
use crate::source::SourceBackend;

/// Type tag in the adaptor table.
pub const KIND: &str = "webhook";

/// Sub-role of the delivery worker's registry name.
const SUB_ROLE: &str = "client";

/// Typed webhook configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Destination URL for event batches.
    pub url: String,
}

impl WebhookConfig {
    /// Coerces the raw mapping. The only accepted shape for `url` is a
    /// string; anything else is a cast error.
    pub fn cast(raw: &Map<String, Value>) -> Result<WebhookConfig, ConfigErrors> {
        match raw.get("url") {
            Some(Value::String(url)) => Ok(WebhookConfig { url: url.clone() }),
            Some(_) => Err(ConfigErrors::single("url", "must be a string")),
            None => Err(ConfigErrors::single("url", "is required")),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigErrors> {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            Ok(())
        } else {
            Err(ConfigErrors::single("url", "must be an http(s) URL"))
        }
    }
}

/// Cloneable handle used by the dispatcher's ingest callback.
#[derive(Debug, Clone)]
pub struct WebhookHandle {
    tx: mpsc::UnboundedSender<Vec<LogEvent>>,
}

impl WebhookHandle {
    /// Non-blocking; delivery failures stay inside the worker's retry
    /// machinery.
    pub fn ingest(&self, events: Vec<LogEvent>) {
        if self.tx.send(events).is_err() {
            warn!("webhook worker gone, dropping batch");
        }
    }
}

/// The delivery worker. Owns the outbound queue and HTTP client.
pub struct WebhookService {
    config: WebhookConfig,
    client: reqwest::Client,
    queue: VecDeque<LogEvent>,
    rx: mpsc::UnboundedReceiver<Vec<LogEvent>>,
    cancel: CancellationToken,
    batch_limit: usize,
    retry_count: u32,
    timeout: Duration,
}

impl WebhookService {
    #[must_use]
    pub fn new(
        config: WebhookConfig,
        runtime_config: &Config,
        cancel: CancellationToken,
    ) -> (Self, WebhookHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = WebhookService {
            config,
            client: reqwest::Client::new(),
            queue: VecDeque::new(),
            rx,
            cancel,
            batch_limit: runtime_config.webhook_batch_limit,
            retry_count: runtime_config.delivery_retry_count,
            timeout: runtime_config.delivery_timeout,
        };
        (service, WebhookHandle { tx })
    }

    /// Processes batches until cancellation. Remaining queued events are
    /// delivered best-effort on shutdown.
    pub async fn run(mut self) {
        debug!(url = %self.config.url, "webhook worker started");
        loop {
            tokio::select! {
                Some(events) = self.rx.recv() => {
                    self.queue.extend(events);
                    self.drain().await;
                }
                () = self.cancel.cancelled() => {
                    while let Ok(events) = self.rx.try_recv() {
                        self.queue.extend(events);
                    }
                    self.drain().await;
                    debug!(url = %self.config.url, "webhook worker shutting down");
                    break;
                }
            }
        }
    }

    async fn drain(&mut self) {
        while !self.queue.is_empty() {
            let take = self.queue.len().min(self.batch_limit);
            let batch: Vec<LogEvent> = self.queue.drain(..take).collect();
            self.post(&batch).await;
        }
    }

    /// Delivers one batch, retrying transient failures.
    async fn post(&self, batch: &[LogEvent]) {
        let bodies: Vec<&Map<String, Value>> = batch.iter().map(|event| &event.body).collect();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let response = self
                .client
                .post(&self.config.url)
                .timeout(self.timeout)
                .json(&bodies)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return,
                Ok(response) if response.status().is_client_error() => {
                    // Rejected outright; retrying cannot succeed.
                    error!(
                        url = %self.config.url,
                        status = %response.status(),
                        "webhook delivery rejected, dropping batch of {}",
                        batch.len()
                    );
                    return;
                }
                Ok(response) => {
                    if attempts >= self.retry_count {
                        error!(
                            url = %self.config.url,
                            status = %response.status(),
                            "webhook delivery failed after {attempts} attempts, dropping batch"
                        );
                        return;
                    }
                }
                Err(err) => {
                    if attempts >= self.retry_count {
                        error!(
                            url = %self.config.url,
                            %err,
                            "webhook delivery failed after {attempts} attempts, dropping batch"
                        );
                        return;
                    }
                }
            }
        }
    }
}

/// Validates `backend`'s configuration, starts its delivery worker, and
/// registers it for dispatch under the source's key.
pub(crate) fn start(
    backend: &SourceBackend,
    config: &Arc<Config>,
    registry: &Arc<Registry>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, Error> {
    let webhook_config = WebhookConfig::cast(&backend.config)
        .and_then(|typed| typed.validate().map(|()| typed))
        .map_err(|errors| Error::InvalidConfig(errors.prefixed()))?;

    let (service, handle) = WebhookService::new(webhook_config, config, cancel.clone());

    let key = WorkerKey::backend(backend.source_id, backend.id, SUB_ROLE);
    registry.reregister(
        key,
        WorkerEntry {
            handle: WorkerHandle::Opaque,
            cancel,
        },
    );
    registry.unsubscribe(backend.source_id, &key);
    let ingest_handle = handle.clone();
    registry.subscribe(
        backend.source_id,
        Subscription {
            key,
            ingest: Arc::new(move |events| ingest_handle.ingest(events)),
        },
    );

    Ok(tokio::spawn(service.run()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_cast_requires_url() {
        let err = WebhookConfig::cast(&raw(json!({}))).unwrap_err();
        assert_eq!(err, ConfigErrors::single("url", "is required"));

        let err = WebhookConfig::cast(&raw(json!({"url": 7}))).unwrap_err();
        assert_eq!(err, ConfigErrors::single("url", "must be a string"));
    }

    #[test]
    fn test_validate_requires_http_scheme() {
        let config = WebhookConfig {
            url: "ftp://example.com".to_owned(),
        };
        assert!(config.validate().is_err());

        let config = WebhookConfig {
            url: "https://example.com/hooks".to_owned(),
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_handle_ingest_is_non_blocking() {
        let (service, handle) = WebhookService::new(
            WebhookConfig {
                url: "http://127.0.0.1:1/unreachable".to_owned(),
            },
            &Config::default(),
            CancellationToken::new(),
        );
        drop(service);

        // worker gone: ingest must neither block nor panic
        handle.ingest(vec![]);
    }
}
