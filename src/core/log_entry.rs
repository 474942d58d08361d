//! Log entry structure
//!
//! Entries and caller records are pooled. A value handed out by the pool is
//! always in its reset state: every optional reference is `None`, every
//! collection is empty with its previous capacity retained.

use super::log_context::{FieldValue, Fields, LogContext};
use super::log_level::LogLevel;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Source location of a log call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerInfo {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub package: String,
}

impl CallerInfo {
    /// Fill from a call site; the package is the file's parent directory
    pub fn fill(&mut self, file: &str, line: u32, function: &str) {
        self.reset();
        self.file.push_str(file);
        self.line = line;
        self.function.push_str(function);
        let package = file
            .rsplit_once('/')
            .map(|(dir, _)| dir.rsplit('/').next().unwrap_or(dir))
            .unwrap_or("");
        self.package.push_str(package);
    }

    pub fn reset(&mut self) {
        self.file.clear();
        self.line = 0;
        self.function.clear();
        self.package.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty() && self.line == 0 && self.function.is_empty() && self.package.is_empty()
    }
}

/// Static process/application identity stamped onto every entry
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub hostname: Option<Arc<str>>,
    pub app: Option<Arc<str>>,
    pub version: Option<Arc<str>>,
    pub environment: Option<Arc<str>>,
}

/// One structured log record
///
/// Exclusively owned by a single in-flight log call.
#[derive(Debug, Default)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub level_name: &'static [u8],
    pub message: Vec<u8>,
    pub caller: Option<Box<CallerInfo>>,
    pub fields: Fields,
    pub metrics: HashMap<String, f64>,
    pub tags: Vec<String>,
    pub pid: u32,
    pub trace_id: String,
    pub span_id: String,
    pub user_id: String,
    pub session_id: String,
    pub request_id: String,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub stack_trace: Option<Vec<u8>>,
    pub identity: Identity,
}

impl LogEntry {
    /// Message as text; invalid UTF-8 is replaced
    pub fn message_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Copy correlation data out of a call context
    pub fn apply_context(&mut self, ctx: &LogContext) {
        if let Some(ref id) = ctx.trace_id {
            self.trace_id.push_str(id);
        }
        if let Some(ref id) = ctx.span_id {
            self.span_id.push_str(id);
        }
        if let Some(ref id) = ctx.user_id {
            self.user_id.push_str(id);
        }
        if let Some(ref id) = ctx.session_id {
            self.session_id.push_str(id);
        }
        if let Some(ref id) = ctx.request_id {
            self.request_id.push_str(id);
        }
        self.tags.extend(ctx.tags.iter().cloned());
        for (name, value) in &ctx.metrics {
            self.metrics.insert(name.clone(), *value);
        }
        self.duration = ctx.duration;
        self.error.clone_from(&ctx.error);
    }

    /// Return every field to its default while keeping allocations
    ///
    /// Nested pooled objects (`caller`, `stack_trace`) must be detached by the
    /// pool before this runs, otherwise they are simply dropped.
    pub fn reset(&mut self) {
        self.timestamp = DateTime::<Utc>::default();
        self.level = LogLevel::default();
        self.level_name = b"";
        self.message.clear();
        self.caller = None;
        self.fields.clear();
        self.metrics.clear();
        self.tags.clear();
        self.pid = 0;
        self.trace_id.clear();
        self.span_id.clear();
        self.user_id.clear();
        self.session_id.clear();
        self.request_id.clear();
        self.duration = None;
        self.error = None;
        self.stack_trace = None;
        self.identity = Identity::default();
    }

    /// True when the entry is at its documented defaults
    pub fn is_reset(&self) -> bool {
        self.timestamp == DateTime::<Utc>::default()
            && self.level == LogLevel::default()
            && self.level_name.is_empty()
            && self.message.is_empty()
            && self.caller.is_none()
            && self.fields.is_empty()
            && self.metrics.is_empty()
            && self.tags.is_empty()
            && self.pid == 0
            && self.trace_id.is_empty()
            && self.span_id.is_empty()
            && self.user_id.is_empty()
            && self.session_id.is_empty()
            && self.request_id.is_empty()
            && self.duration.is_none()
            && self.error.is_none()
            && self.stack_trace.is_none()
            && self.identity.hostname.is_none()
            && self.identity.app.is_none()
            && self.identity.version.is_none()
            && self.identity.environment.is_none()
    }
}
