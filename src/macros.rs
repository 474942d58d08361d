//! Logging macros for ergonomic log message formatting.
//!
//! The macros check the level before evaluating anything, format into a pooled
//! buffer and record the call site (file, line and `module_path!()`).
//!
//! # Examples
//!
//! ```
//! use pooled_logger::prelude::*;
//! use pooled_logger::{info, warn};
//!
//! let logger = Logger::builder().output(MemorySink::new()).build().unwrap();
//!
//! // Basic logging
//! info!(logger, "Server started");
//!
//! // With format arguments
//! let port = 8080;
//! info!(logger, "Server listening on port {}", port);
//!
//! // With structured fields
//! warn!(logger, { "user_id" => 42, "action" => "login" }, "slow login: {}ms", 950);
//! ```

/// Log a message at an explicit level.
///
/// # Examples
///
/// ```
/// # use pooled_logger::prelude::*;
/// # let logger = Logger::builder().output(MemorySink::new()).build().unwrap();
/// use pooled_logger::log;
/// log!(logger, LogLevel::Info, "Simple message");
/// log!(logger, LogLevel::Error, "Error code: {}", 500);
/// log!(logger, LogLevel::Error, { "code" => 500 }, "request failed");
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, { $($key:expr => $value:expr),* $(,)? }, $($arg:tt)+) => {{
        let logger = &$logger;
        let level = $level;
        if logger.is_enabled(level) {
            #[allow(unused_mut)]
            let mut fields = $crate::Fields::new();
            $(
                fields.insert(
                    ::std::string::String::from($key),
                    $crate::FieldValue::from($value),
                );
            )*
            logger.log_args(
                $crate::CallSite::here(::std::module_path!()),
                level,
                &fields,
                ::std::format_args!($($arg)+),
            );
        }
    }};
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger = &$logger;
        logger.log_args(
            $crate::CallSite::here(::std::module_path!()),
            $level,
            &$crate::Fields::new(),
            ::std::format_args!($($arg)+),
        );
    }};
}

/// Log a trace-level message.
///
/// # Examples
///
/// ```
/// # use pooled_logger::prelude::*;
/// # let logger = Logger::builder().level(LogLevel::Trace).output(MemorySink::new()).build().unwrap();
/// use pooled_logger::trace;
/// trace!(logger, "Entering function: calculate()");
/// trace!(logger, "Variable value: {}", 42);
/// ```
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Trace, $($arg)+)
    };
}

/// Log a debug-level message.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Debug, $($arg)+)
    };
}

/// Log an info-level message.
///
/// # Examples
///
/// ```
/// # use pooled_logger::prelude::*;
/// # let logger = Logger::builder().output(MemorySink::new()).build().unwrap();
/// use pooled_logger::info;
/// info!(logger, "Application started");
/// info!(logger, { "items" => 100_u64 }, "Processing batch");
/// ```
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Info, $($arg)+)
    };
}

/// Log a warning-level message.
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Warn, $($arg)+)
    };
}

/// Log an error-level message.
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Error, $($arg)+)
    };
}

/// Log a fatal-level message, then run the logger's exit function.
///
/// # Examples
///
/// ```
/// # use pooled_logger::prelude::*;
/// # let logger = Logger::builder().output(MemorySink::new()).exit_fn(|_| {}).build().unwrap();
/// use pooled_logger::fatal;
/// fatal!(logger, "Unable to recover from error: {}", "disk full");
/// ```
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Fatal, $($arg)+)
    };
}

/// Log a panic-level message, then run the logger's exit function.
///
/// Named to stay clear of `std::panic!`; it does not unwind.
#[macro_export]
macro_rules! panic_log {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Panic, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use crate::core::formatter::ShowFlags;
    use crate::core::log_level::LogLevel;
    use crate::core::logger::Logger;
    use crate::writers::MemorySink;

    fn logger(level: LogLevel) -> (Logger, MemorySink) {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .level(level)
            .output(sink.clone())
            .show(ShowFlags {
                timestamp: false,
                caller: false,
                ..ShowFlags::default()
            })
            .build()
            .unwrap();
        (logger, sink)
    }

    #[test]
    fn test_macros_format_and_filter() {
        let (logger, sink) = logger(LogLevel::Info);
        let port = 8080;
        info!(logger, "listening on {}", port);
        debug!(logger, "not shown {}", port);
        warn!(logger, { "attempt" => 3, "of" => 5 }, "retrying");
        logger.close().unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "[INFO ] listening on 8080".to_string(),
                "[WARN ] retrying | attempt=3 of=5".to_string(),
            ]
        );
    }

    #[test]
    fn test_disabled_level_skips_argument_evaluation() {
        let (logger, _sink) = logger(LogLevel::Error);
        let mut evaluated = false;
        info!(logger, { "k" => { evaluated = true; 1 } }, "skipped");
        assert!(!evaluated);
        logger.close().unwrap();
    }

    #[test]
    fn test_macro_records_module() {
        let sink = MemorySink::new();
        let logger = Logger::builder().output(sink.clone()).json().build().unwrap();
        error!(logger, "located");
        logger.close().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&sink.contents()).unwrap();
        assert_eq!(value["caller"]["function"], "pooled_logger::macros::tests");
        assert!(value["caller"]["file"].as_str().unwrap().ends_with("macros.rs"));
    }
}
