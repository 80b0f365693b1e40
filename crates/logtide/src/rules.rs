//! Compiled drop and routing rules.
//!
//! Rule predicates come in two shapes: a regular expression over the
//! event's primary message, or an expression in the log query language.
//! Both are compiled once at source load; evaluation per event is
//! allocation-free. A rule that fails to compile is skipped with a
//! warning and does not poison its siblings.

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::event::LogEvent;
use crate::source::{RuleSpec, Source, SourceToken};

/// Compilation failures for rule predicates.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("empty query")]
    EmptyQuery,
}

/// A compiled rule predicate.
#[derive(Debug, Clone)]
pub enum RuleExpr {
    Regex(Regex),
    Lql(LqlQuery),
}

impl RuleExpr {
    pub fn compile(spec: &RuleSpec) -> Result<RuleExpr, RuleError> {
        match spec {
            RuleSpec::Regex(pattern) => Ok(RuleExpr::Regex(Regex::new(pattern)?)),
            RuleSpec::Lql(query) => Ok(RuleExpr::Lql(LqlQuery::parse(query)?)),
        }
    }

    #[must_use]
    pub fn matches(&self, event: &LogEvent) -> bool {
        match self {
            RuleExpr::Regex(regex) => regex.is_match(event.event_message()),
            RuleExpr::Lql(query) => query.matches(event),
        }
    }
}

/// A compiled log-query-language expression.
///
/// The expression is a whitespace-separated conjunction of matchers:
/// bare keywords match as substrings of `event_message`, and
/// `field:value` terms compare a body field (dotted paths descend into
/// nested objects) against the literal value.
#[derive(Debug, Clone)]
pub struct LqlQuery {
    matchers: Vec<Matcher>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Keyword(String),
    Field { path: Vec<String>, value: String },
}

impl LqlQuery {
    pub fn parse(input: &str) -> Result<LqlQuery, RuleError> {
        let matchers: Vec<Matcher> = input
            .split_whitespace()
            .map(|token| match token.split_once(':') {
                Some((path, value)) if !path.is_empty() && !value.is_empty() => Matcher::Field {
                    path: path.split('.').map(str::to_owned).collect(),
                    value: value.to_owned(),
                },
                _ => Matcher::Keyword(token.to_owned()),
            })
            .collect();

        if matchers.is_empty() {
            return Err(RuleError::EmptyQuery);
        }
        Ok(LqlQuery { matchers })
    }

    #[must_use]
    pub fn matches(&self, event: &LogEvent) -> bool {
        self.matchers.iter().all(|matcher| match matcher {
            Matcher::Keyword(keyword) => event.event_message().contains(keyword.as_str()),
            Matcher::Field { path, value } => {
                lookup(&event.body, path).is_some_and(|found| value_eq(found, value))
            }
        })
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = map.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_eq(found: &Value, expected: &str) -> bool {
    match found {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

/// A compiled routing rule: predicate plus sink token.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub expr: RuleExpr,
    pub sink: SourceToken,
}

/// All of a source's compiled rules, memoized at source load.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    /// Drop expression; matching events are discarded silently.
    pub drop: Option<RuleExpr>,
    /// Routing rules in the source's declared order.
    pub routes: Vec<CompiledRoute>,
}

impl CompiledRules {
    #[must_use]
    pub fn compile(source: &Source) -> CompiledRules {
        let drop = source.drop_expr.as_ref().and_then(|spec| {
            RuleExpr::compile(spec)
                .map_err(|err| {
                    warn!(source = %source.token, %err, "skipping invalid drop expression");
                })
                .ok()
        });

        let routes = source
            .rules
            .iter()
            .filter_map(|rule| match RuleExpr::compile(&rule.spec) {
                Ok(expr) => Some(CompiledRoute {
                    expr,
                    sink: rule.sink,
                }),
                Err(err) => {
                    warn!(source = %source.token, %err, "skipping invalid routing rule");
                    None
                }
            })
            .collect();

        CompiledRules { drop, routes }
    }
}
