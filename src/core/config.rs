//! Declarative logger configuration
//!
//! [`LoggerConfig`] mirrors every option that can be expressed as data;
//! anything that needs code (custom sinks, formatters, hooks, callbacks) is a
//! [`LoggerBuilder`](super::logger::LoggerBuilder) method instead. All fields
//! are optional in serialized form.
//!
//! # Example
//!
//! ```
//! use pooled_logger::{LoggerConfig, LogLevel};
//!
//! let config = LoggerConfig::from_json(r#"{
//!     "level": "WARN",
//!     "formatter": "json",
//!     "sampling_rate": 10,
//!     "async_mode": { "worker_count": 2, "queue_size": 512 }
//! }"#).unwrap();
//!
//! assert_eq!(config.level, LogLevel::Warn);
//! assert_eq!(config.async_mode.unwrap().worker_count, 2);
//! ```

use super::error::{LoggerError, Result};
use super::formatter::{ShowFlags, DEFAULT_MASK};
use super::log_level::LogLevel;
use super::timestamp::TimestampFormat;
use crate::writers::RotationPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where output goes: `"stdout"`, `"stderr"`, or a file path
pub const STDOUT: &str = "stdout";
pub const STDERR: &str = "stderr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub queue_size: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub batch_timeout_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            batch_size: 64,
            flush_interval_ms: 1000,
            batch_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncSettings {
    pub worker_count: usize,
    pub queue_size: usize,
    /// Per-job deadline in milliseconds; 0 disables it
    pub job_timeout_ms: u64,
    pub disable_timeout: bool,
}

impl Default for AsyncSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 1024,
            job_timeout_ms: 5000,
            disable_timeout: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHookSettings {
    pub path: String,
    #[serde(default = "default_hook_level")]
    pub level: LogLevel,
}

fn default_hook_level() -> LogLevel {
    LogLevel::Error
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub output: String,
    pub error_output: String,
    /// `"text"` or `"json"`
    pub formatter: String,
    pub colors: bool,
    pub timestamp_format: TimestampFormat,
    pub show: ShowFlags,
    pub mask: String,
    /// Added to the default sensitive keys
    pub sensitive_keys: Vec<String>,
    pub caller: bool,
    /// Accepted and ignored; the recorded call site is always the logging call
    pub caller_depth: usize,
    /// Capture a stack trace for entries at or above this level
    pub stack_trace_level: Option<LogLevel>,
    pub buffer: Option<BufferSettings>,
    /// One in `sampling_rate` calls is logged; 0 or 1 disables sampling
    pub sampling_rate: u64,
    pub async_mode: Option<AsyncSettings>,
    /// Only applies when `output` is a file path
    pub rotation: Option<RotationPolicy>,
    pub clock_resolution_ms: Option<u64>,
    pub app: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub hostname: Option<String>,
    pub file_hook: Option<FileHookSettings>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: STDOUT.to_string(),
            error_output: STDERR.to_string(),
            formatter: "text".to_string(),
            colors: false,
            timestamp_format: TimestampFormat::default(),
            show: ShowFlags::default(),
            mask: DEFAULT_MASK.to_string(),
            sensitive_keys: Vec::new(),
            caller: true,
            caller_depth: 0,
            stack_trace_level: None,
            buffer: None,
            sampling_rate: 0,
            async_mode: None,
            rotation: None,
            clock_resolution_ms: None,
            app: None,
            version: None,
            environment: None,
            hostname: None,
            file_hook: None,
        }
    }
}

impl LoggerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::io_operation("reading logger config", path.display().to_string(), e)
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.formatter.as_str(), "text" | "json") {
            return Err(LoggerError::config(
                "formatter",
                format!("unknown formatter '{}', expected 'text' or 'json'", self.formatter),
            ));
        }
        if let Some(ref async_mode) = self.async_mode {
            if async_mode.worker_count == 0 || async_mode.queue_size == 0 {
                return Err(LoggerError::config(
                    "async_mode",
                    "worker_count and queue_size must be greater than 0",
                ));
            }
        }
        if let Some(ref buffer) = self.buffer {
            if buffer.batch_size == 0 || buffer.queue_size == 0 {
                return Err(LoggerError::config(
                    "buffer",
                    "batch_size and queue_size must be greater than 0",
                ));
            }
        }
        if self.output.is_empty() || self.error_output.is_empty() {
            return Err(LoggerError::config("output", "output targets must not be empty"));
        }
        Ok(())
    }
}
