//! Structured values and per-call context
//!
//! This module provides:
//! - `FieldValue`: the closed set of value kinds a structured field may hold
//! - `Fields`: the key/value map carried by loggers, jobs and entries
//! - `LogContext`: per-call correlation ids, tags, metrics and an optional
//!   processing deadline

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::time::{Duration, Instant};

/// Value type for structured logging fields
///
/// Formatters dispatch on the variant; there is no runtime type inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Null,
    ByteList(Vec<Vec<u8>>),
}

/// Structured fields keyed by name
pub type Fields = HashMap<String, FieldValue>;

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Uint(u) => write!(f, "{}", u),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Null => f.write_str("null"),
            FieldValue::ByteList(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(&String::from_utf8_lossy(item))?;
                }
                f.write_str("]")
            }
        }
    }
}

impl FieldValue {
    /// Convert to serde_json::Value for JSON serialization
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            FieldValue::Int(i) => Value::Number((*i).into()),
            FieldValue::Uint(u) => Value::Number((*u).into()),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Null => Value::Null,
            FieldValue::ByteList(items) => Value::Array(
                items
                    .iter()
                    .map(|b| Value::String(String::from_utf8_lossy(b).into_owned()))
                    .collect(),
            ),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(b: &[u8]) -> Self {
        FieldValue::Bytes(b.to_vec())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

impl From<u64> for FieldValue {
    fn from(u: u64) -> Self {
        FieldValue::Uint(u)
    }
}

impl From<u32> for FieldValue {
    fn from(u: u32) -> Self {
        FieldValue::Uint(u64::from(u))
    }
}

impl From<usize> for FieldValue {
    fn from(u: usize) -> Self {
        FieldValue::Uint(u as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<Vec<u8>>> for FieldValue {
    fn from(items: Vec<Vec<u8>>) -> Self {
        FieldValue::ByteList(items)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Source position of a log call, captured with `#[track_caller]`
#[derive(Debug, Clone, Copy)]
pub struct CallSite {
    pub location: &'static Location<'static>,
    /// `module_path!()` of the caller when logged through a macro
    pub module: &'static str,
}

impl CallSite {
    #[track_caller]
    pub fn here(module: &'static str) -> Self {
        Self {
            location: Location::caller(),
            module,
        }
    }
}

/// Per-call context
///
/// Carries the correlation data copied into an entry and, on the async path,
/// the per-job processing deadline.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub tags: Vec<String>,
    pub metrics: Vec<(String, f64)>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    call_site: Option<CallSite>,
}

impl LogContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Derive a context whose deadline is `timeout` from now
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        match self.deadline {
            Some(existing) if existing <= candidate => {}
            _ => {
                self.deadline = Some(candidate);
                self.timeout = Some(timeout);
            }
        }
        self
    }

    #[must_use]
    pub fn with_call_site(mut self, site: CallSite) -> Self {
        self.call_site = Some(site);
        self
    }

    pub fn call_site(&self) -> Option<CallSite> {
        self.call_site
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Timeout the current deadline was derived from
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// True once the deadline, if any, has passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True when the context carries nothing to copy into an entry
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none()
            && self.span_id.is_none()
            && self.user_id.is_none()
            && self.session_id.is_none()
            && self.request_id.is_none()
            && self.tags.is_empty()
            && self.metrics.is_empty()
            && self.duration.is_none()
            && self.error.is_none()
    }
}
