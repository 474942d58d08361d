//! Entry formatters
//!
//! A [`Formatter`] renders a populated entry into a caller-supplied pooled
//! buffer and must not retain either past the call. Two implementations are
//! provided:
//! - [`TextFormatter`]: human-readable single line, optional ANSI colours
//! - [`JsonFormatter`]: one JSON object per line

use super::error::Result;
use super::log_context::FieldValue;
use super::log_entry::LogEntry;
use super::timestamp::TimestampFormat;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::io::Write;

pub trait Formatter: Send + Sync {
    /// Append the rendering of `entry` to `buf`
    fn format(&self, buf: &mut Vec<u8>, entry: &LogEntry) -> Result<()>;

    fn name(&self) -> &str;
}

/// Which entry parts a formatter renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowFlags {
    pub timestamp: bool,
    pub level: bool,
    pub caller: bool,
    pub pid: bool,
    pub identity: bool,
    pub trace: bool,
    pub fields: bool,
    pub tags: bool,
    pub metrics: bool,
    pub duration: bool,
    pub error: bool,
    pub stack_trace: bool,
}

impl Default for ShowFlags {
    fn default() -> Self {
        Self {
            timestamp: true,
            level: true,
            caller: true,
            pid: false,
            identity: true,
            trace: true,
            fields: true,
            tags: true,
            metrics: true,
            duration: true,
            error: true,
            stack_trace: true,
        }
    }
}

impl ShowFlags {
    /// Only level and message
    pub fn minimal() -> Self {
        Self {
            timestamp: false,
            level: true,
            caller: false,
            pid: false,
            identity: false,
            trace: false,
            fields: false,
            tags: false,
            metrics: false,
            duration: false,
            error: false,
            stack_trace: false,
        }
    }
}

pub const DEFAULT_MASK: &str = "******";

/// Options shared by the built-in formatters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterConfig {
    pub timestamp_format: TimestampFormat,
    pub show: ShowFlags,
    /// Replacement written for sensitive field values
    pub mask: String,
    /// Field keys (case-insensitive) whose values are masked
    pub sensitive_keys: Vec<String>,
    /// ANSI colours for the level (text only)
    pub colors: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            timestamp_format: TimestampFormat::default(),
            show: ShowFlags::default(),
            mask: DEFAULT_MASK.to_string(),
            sensitive_keys: ["password", "passwd", "secret", "token", "api_key", "authorization"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            colors: false,
        }
    }
}

impl FormatterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    #[must_use]
    pub fn with_show(mut self, show: ShowFlags) -> Self {
        self.show = show;
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = mask.into();
        self
    }

    #[must_use]
    pub fn with_sensitive_key(mut self, key: impl Into<String>) -> Self {
        self.sensitive_keys.push(key.into());
        self
    }

    #[must_use]
    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Escape control bytes and backslashes so one entry stays one line
fn write_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        match b {
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            0x00..=0x1f | 0x7f => {
                let _ = write!(buf, "\\x{:02x}", b);
            }
            _ => buf.push(b),
        }
    }
}

/// Sorted field keys, for stable output
fn sorted_keys(entry: &LogEntry) -> Vec<&str> {
    let mut keys: Vec<&str> = entry.fields.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

/// Human-readable formatter
///
/// Example: `2025-01-08T10:30:45.123Z [INFO ] (src/main.rs:10) started | port=8080`
#[derive(Debug, Clone, Default)]
pub struct TextFormatter {
    config: FormatterConfig,
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    fn write_value(&self, buf: &mut Vec<u8>, key: &str, value: &FieldValue) {
        if self.config.is_sensitive(key) {
            buf.extend_from_slice(self.config.mask.as_bytes());
            return;
        }
        match value {
            FieldValue::String(s) if s.contains(' ') => {
                let _ = write!(buf, "{:?}", s);
            }
            FieldValue::String(s) => write_escaped(buf, s.as_bytes()),
            FieldValue::Bytes(b) => write_escaped(buf, b),
            FieldValue::ByteList(items) => {
                buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b',');
                    }
                    write_escaped(buf, item);
                }
                buf.push(b']');
            }
            other => {
                let _ = write!(buf, "{}", other);
            }
        }
    }
}

impl Formatter for TextFormatter {
    fn format(&self, buf: &mut Vec<u8>, entry: &LogEntry) -> Result<()> {
        let show = &self.config.show;

        if show.timestamp {
            self.config.timestamp_format.write_to(buf, &entry.timestamp);
            buf.push(b' ');
        }

        if show.level {
            let name = std::str::from_utf8(entry.level_name).unwrap_or("?");
            if self.config.colors {
                let colored = format!("{:5}", name).color(entry.level.color_code());
                let _ = write!(buf, "[{}] ", colored);
            } else {
                let _ = write!(buf, "[{:5}] ", name);
            }
        }

        if show.pid {
            let _ = write!(buf, "[{}] ", entry.pid);
        }

        if show.identity {
            if let Some(ref app) = entry.identity.app {
                write_escaped(buf, app.as_bytes());
                buf.push(b' ');
            }
        }

        if show.caller {
            if let Some(ref caller) = entry.caller {
                let _ = write!(buf, "({}:{}) ", caller.file, caller.line);
            }
        }

        write_escaped(buf, &entry.message);

        let mut separated = false;
        let mut sep = |buf: &mut Vec<u8>| {
            if separated {
                buf.push(b' ');
            } else {
                buf.extend_from_slice(b" | ");
                separated = true;
            }
        };

        if show.fields {
            for key in sorted_keys(entry) {
                sep(buf);
                write_escaped(buf, key.as_bytes());
                buf.push(b'=');
                self.write_value(buf, key, &entry.fields[key]);
            }
        }

        if show.trace {
            for (name, id) in [
                ("trace_id", &entry.trace_id),
                ("span_id", &entry.span_id),
                ("user_id", &entry.user_id),
                ("session_id", &entry.session_id),
                ("request_id", &entry.request_id),
            ] {
                if !id.is_empty() {
                    sep(buf);
                    let _ = write!(buf, "{}=", name);
                    write_escaped(buf, id.as_bytes());
                }
            }
        }

        if show.tags && !entry.tags.is_empty() {
            sep(buf);
            buf.extend_from_slice(b"tags=[");
            for (i, tag) in entry.tags.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_escaped(buf, tag.as_bytes());
            }
            buf.push(b']');
        }

        if show.metrics && !entry.metrics.is_empty() {
            let mut names: Vec<&String> = entry.metrics.keys().collect();
            names.sort_unstable();
            for name in names {
                sep(buf);
                write_escaped(buf, name.as_bytes());
                let _ = write!(buf, "={}", entry.metrics[name]);
            }
        }

        if show.duration {
            if let Some(duration) = entry.duration {
                sep(buf);
                let _ = write!(buf, "duration={:?}", duration);
            }
        }

        if show.error {
            if let Some(ref error) = entry.error {
                sep(buf);
                let _ = write!(buf, "error={:?}", error);
            }
        }

        buf.push(b'\n');

        if show.stack_trace {
            if let Some(ref stack) = entry.stack_trace {
                buf.extend_from_slice(stack);
                if !stack.ends_with(b"\n") {
                    buf.push(b'\n');
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "text"
    }
}

/// Single-line JSON formatter
///
/// Example: `{"timestamp":"2025-01-08T10:30:45.123Z","level":"INFO","message":"started","port":8080}`
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    config: FormatterConfig,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, buf: &mut Vec<u8>, entry: &LogEntry) -> Result<()> {
        use serde_json::{Map, Value};

        let show = &self.config.show;
        let mut obj = Map::new();

        if show.timestamp {
            let ts = match self.config.timestamp_format.numeric_value(&entry.timestamp) {
                Some(n) => Value::Number(n.into()),
                None => Value::String(self.config.timestamp_format.format(&entry.timestamp)),
            };
            obj.insert("timestamp".to_string(), ts);
        }
        if show.level {
            obj.insert(
                "level".to_string(),
                Value::String(String::from_utf8_lossy(entry.level_name).into_owned()),
            );
        }
        obj.insert(
            "message".to_string(),
            Value::String(entry.message_str().into_owned()),
        );
        if show.pid {
            obj.insert("pid".to_string(), Value::Number(entry.pid.into()));
        }
        if show.caller {
            if let Some(ref caller) = entry.caller {
                obj.insert(
                    "caller".to_string(),
                    serde_json::json!({
                        "file": caller.file,
                        "line": caller.line,
                        "function": caller.function,
                        "package": caller.package,
                    }),
                );
            }
        }
        if show.identity {
            for (name, value) in [
                ("hostname", &entry.identity.hostname),
                ("app", &entry.identity.app),
                ("version", &entry.identity.version),
                ("environment", &entry.identity.environment),
            ] {
                if let Some(v) = value {
                    obj.insert(name.to_string(), Value::String(v.to_string()));
                }
            }
        }
        if show.trace {
            for (name, id) in [
                ("trace_id", &entry.trace_id),
                ("span_id", &entry.span_id),
                ("user_id", &entry.user_id),
                ("session_id", &entry.session_id),
                ("request_id", &entry.request_id),
            ] {
                if !id.is_empty() {
                    obj.insert(name.to_string(), Value::String(id.clone()));
                }
            }
        }
        if show.tags && !entry.tags.is_empty() {
            obj.insert("tags".to_string(), serde_json::to_value(&entry.tags)?);
        }
        if show.metrics && !entry.metrics.is_empty() {
            obj.insert("metrics".to_string(), serde_json::to_value(&entry.metrics)?);
        }
        if show.duration {
            if let Some(duration) = entry.duration {
                obj.insert(
                    "duration_ms".to_string(),
                    serde_json::json!(duration.as_secs_f64() * 1000.0),
                );
            }
        }
        if show.error {
            if let Some(ref error) = entry.error {
                obj.insert("error".to_string(), Value::String(error.clone()));
            }
        }
        if show.stack_trace {
            if let Some(ref stack) = entry.stack_trace {
                obj.insert(
                    "stack_trace".to_string(),
                    Value::String(String::from_utf8_lossy(stack).into_owned()),
                );
            }
        }
        if show.fields {
            // Reserved keys win over user fields
            for (key, value) in &entry.fields {
                let rendered = if self.config.is_sensitive(key) {
                    Value::String(self.config.mask.clone())
                } else {
                    value.to_json_value()
                };
                obj.entry(key.clone()).or_insert(rendered);
            }
        }

        serde_json::to_writer(&mut *buf, &Value::Object(obj))?;
        buf.push(b'\n');
        Ok(())
    }

    fn name(&self) -> &str {
        "json"
    }
}
