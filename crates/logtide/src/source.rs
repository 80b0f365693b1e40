//! Sources, routing rules, and backend rows.
//!
//! A [`Source`] is the logical log stream. It is immutable from the
//! runtime's perspective; mutation is picked up by restarting the
//! source's supervisor. Rules name *sink* tokens rather than holding
//! references, so source graphs cannot form reference cycles; routing
//! depth is capped at one hop by the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable opaque token identifying a source (128-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceToken(pub Uuid);

impl SourceToken {
    #[must_use]
    pub fn random() -> Self {
        SourceToken(Uuid::new_v4())
    }
}

impl fmt::Display for SourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Numeric source id, assigned by the external store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceId(pub i64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Numeric id of a `SourceBackend` row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BackendId(pub i64);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Predicate shape of a routing or drop rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "expr")]
pub enum RuleSpec {
    /// Query expression in the log query language.
    Lql(String),
    /// Regular expression over the event's `event_message`.
    Regex(String),
}

/// Routing rule: a predicate plus the sink source that receives
/// matching events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub spec: RuleSpec,
    pub sink: SourceToken,
}

/// The logical log stream.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub token: SourceToken,
    pub owner_id: i64,
    pub name: String,
    /// Notification cadence in milliseconds.
    pub notification_interval_ms: u64,
    /// Optional drop expression; matching events are discarded silently.
    pub drop_expr: Option<RuleSpec>,
    /// Routing rules, evaluated in declaration order.
    pub rules: Vec<Rule>,
}

impl Source {
    /// A source with empty rules and default cadence.
    #[must_use]
    pub fn new(id: SourceId, token: SourceToken, name: impl Into<String>) -> Self {
        Source {
            id,
            token,
            owner_id: 0,
            name: name.into(),
            notification_interval_ms: 4_000,
            drop_expr: None,
            rules: Vec::new(),
        }
    }
}

/// A configured backend for a source. `kind` selects the adaptor;
/// `config` is an opaque string-keyed mapping validated by the adaptor
/// before the row may be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBackend {
    pub id: BackendId,
    pub source_id: SourceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub config: Map<String, Value>,
}
