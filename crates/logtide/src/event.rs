//! Log events and normalization.
//!
//! Raw ingest parameters are string-keyed JSON mappings. Normalization
//! produces a [`LogEvent`] whose body always carries a non-empty
//! `event_message`, a `timestamp`, and an `id`; the legacy `message` key
//! is renamed on ingress and `metadata` is preserved verbatim whether
//! scalar or nested. Normalization never panics: a raw mapping without
//! any usable message is rejected with [`NormalizeError`] and the caller
//! decides how to count it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::source::SourceToken;

/// Body key carrying the primary message.
pub const EVENT_MESSAGE_KEY: &str = "event_message";

/// Legacy body key renamed to [`EVENT_MESSAGE_KEY`] on ingress.
pub const LEGACY_MESSAGE_KEY: &str = "message";

/// Body key carrying the event timestamp (microseconds).
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Body key whose value is preserved verbatim, scalar or nested.
pub const METADATA_KEY: &str = "metadata";

/// Body key mirroring the event id.
pub const ID_KEY: &str = "id";

/// Params marker set on synthetic events emitted by the runtime itself.
pub const SYSTEM_MARKER_KEY: &str = "is_system_log_event?";

/// Current wall clock in microseconds since the epoch.
#[must_use]
pub fn now_micros() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Rejection reasons from normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The raw mapping carries neither `event_message` nor `message`,
    /// or the message is empty.
    #[error("event has no message")]
    MissingMessage,
}

/// A normalized log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Locally unique identifier.
    pub id: Uuid,
    /// Owning source.
    pub source_token: SourceToken,
    /// Ingestion timestamp in microseconds, monotonically non-decreasing
    /// per source.
    pub ingested_at: u64,
    /// Normalized body.
    pub body: Map<String, Value>,
    /// Original raw mapping, kept for debugging and system markers.
    pub params: Map<String, Value>,
}

impl LogEvent {
    /// Normalizes a raw mapping into an event.
    ///
    /// - `message` is renamed to `event_message` when the latter is
    ///   absent.
    /// - `timestamp` is injected from `ingested_at` when absent; an
    ///   existing value is kept untouched.
    /// - a fresh `id` is generated and mirrored into the body.
    /// - `metadata` is left exactly as supplied.
    pub fn make(
        params: Map<String, Value>,
        source_token: SourceToken,
        ingested_at: u64,
    ) -> Result<LogEvent, NormalizeError> {
        let mut body = params.clone();

        if !body.contains_key(EVENT_MESSAGE_KEY) {
            if let Some(message) = body.remove(LEGACY_MESSAGE_KEY) {
                body.insert(EVENT_MESSAGE_KEY.to_owned(), message);
            }
        }

        let has_message = match body.get(EVENT_MESSAGE_KEY) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !has_message {
            return Err(NormalizeError::MissingMessage);
        }

        let id = Uuid::new_v4();
        body.insert(ID_KEY.to_owned(), Value::String(id.to_string()));
        body.entry(TIMESTAMP_KEY)
            .or_insert_with(|| Value::from(ingested_at));

        Ok(LogEvent {
            id,
            source_token,
            ingested_at,
            body,
            params,
        })
    }

    /// A synthetic runtime-generated event carrying the system marker.
    #[must_use]
    pub fn system(source_token: SourceToken, ingested_at: u64, message: &str) -> LogEvent {
        let mut params = Map::new();
        params.insert(SYSTEM_MARKER_KEY.to_owned(), Value::Bool(true));
        params.insert(
            EVENT_MESSAGE_KEY.to_owned(),
            Value::String(message.to_owned()),
        );
        Self::make(params, source_token, ingested_at)
            .expect("system events always carry a message")
    }

    /// Whether this event was generated by the runtime itself.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.params
            .get(SYSTEM_MARKER_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The primary message. Non-empty for every normalized event.
    #[must_use]
    pub fn event_message(&self) -> &str {
        self.body
            .get(EVENT_MESSAGE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Numeric body timestamp; 0 when absent or non-numeric.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.body
            .get(TIMESTAMP_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}
