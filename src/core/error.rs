//! Error types for the logger system
//!
//! Every internal failure is funnelled through a single [`ErrorHandler`];
//! nothing in the log path returns an error to the caller of a log method.

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, LoggerError>;

/// Callback receiving every internal failure (backpressure, formatter, sink,
/// hook, panic and close errors).
pub type ErrorHandler = Arc<dyn Fn(&LoggerError) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// IO error with context
    #[error("IO error while {operation}: {message}")]
    IoOperation {
        operation: String,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Async job queue full; the job was dropped
    #[error("Log queue full: {current}/{max} jobs buffered, job dropped")]
    QueueFull { current: usize, max: usize },

    /// Logger already closed
    #[error("Logger already stopped")]
    LoggerStopped,

    /// Buffered writer no longer accepts writes
    #[error("Buffered writer is closed")]
    WriterClosed,

    /// Invalid configuration with details
    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// File rotation error
    #[error("File rotation failed for '{path}': {message}")]
    FileRotationError { path: String, message: String },

    /// Formatter error with format type
    #[error("Formatter error ({format_type}): {message}")]
    FormatterError {
        format_type: String,
        message: String,
    },

    /// Hook returned an error
    #[error("Hook '{hook}' failed: {message}")]
    HookError { hook: String, message: String },

    /// A dispatched job exceeded its processing deadline
    #[error("Async job exceeded its {timeout_ms}ms deadline; {skipped_hooks} hook(s) skipped")]
    JobTimeout { timeout_ms: u64, skipped_hooks: usize },

    /// A panic was caught while processing a job or running a hook
    #[error("Recovered panic in {location}: {message}")]
    Panic { location: String, message: String },

    /// One or more components failed to close
    #[error("Shutdown completed with {} error(s): {}", errors.len(), errors.join("; "))]
    Shutdown { errors: Vec<String> },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LoggerError {
    /// Create an IO operation error with context
    pub fn io_operation(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        LoggerError::IoOperation {
            operation: operation.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a queue full error with buffer details
    pub fn queue_full(current: usize, max: usize) -> Self {
        LoggerError::QueueFull { current, max }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a file rotation error
    pub fn file_rotation(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::FileRotationError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a formatter error
    pub fn formatter(format_type: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::FormatterError {
            format_type: format_type.into(),
            message: message.into(),
        }
    }

    /// Create a hook error
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::HookError {
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a recovered-panic error from a `catch_unwind` payload
    pub fn panic(location: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        LoggerError::Panic {
            location: location.into(),
            message: panic_message(payload),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        LoggerError::Other(msg.into())
    }

    /// True for the expected-under-load backpressure signal
    pub fn is_backpressure(&self) -> bool {
        matches!(self, LoggerError::QueueFull { .. })
    }
}

/// Extract a printable message from a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
