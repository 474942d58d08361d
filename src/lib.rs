//! # Pooled Logger
//!
//! A high-throughput structured logging runtime built around object reuse.
//!
//! ## Features
//!
//! - **Pooled hot path**: entries, caller records, byte buffers and field maps
//!   are recycled through two-tier lock-free pools
//! - **Async dispatch**: bounded job queue drained by worker threads, with
//!   explicit backpressure instead of blocking
//! - **Batched output**: a buffered writer coalesces entries into one physical
//!   write per batch
//! - **Deterministic sampling**: exactly one in N calls gets through
//! - **Structured**: typed fields, correlation context, text or JSON output
//!   with sensitive-key masking
//!
//! ## Quick start
//!
//! ```
//! use pooled_logger::prelude::*;
//! use pooled_logger::info;
//!
//! let sink = MemorySink::new();
//! let logger = Logger::builder()
//!     .output(sink.clone())
//!     .show(ShowFlags::minimal())
//!     .build()
//!     .unwrap();
//!
//! info!(logger, "listening on port {}", 8080);
//! logger.close().unwrap();
//!
//! assert_eq!(sink.contents_string(), "[INFO ] listening on port 8080\n");
//! ```

pub mod core;
pub mod macros;
pub mod writers;

pub mod prelude {
    pub use crate::core::{
        BufferedWriterConfig, DispatcherConfig, FieldValue, Fields, FnHook, Formatter,
        FormatterConfig, Hook, LogContext, LogEntry, LogLevel, Logger, LoggerBuilder,
        LoggerConfig, LoggerError, Result, ShowFlags, Sink, TimestampFormat,
    };
    pub use crate::writers::{MemorySink, RotatingFileWriter, RotationPolicy, StderrSink, StdoutSink};
}

pub use crate::core::{
    AsyncDispatcher, BufferedWriter, BufferedWriterConfig, CallSite, CallerInfo, CoarseClock,
    DispatcherConfig, EntryCallback, ErrorHandler, ExitFn, FieldValue, Fields, FnHook, Formatter,
    FormatterConfig, Hook, HookRegistry, Identity, Job, JsonFormatter, LogContext, LogEntry,
    LogLevel, LogSampler, Logger, LoggerBuilder, LoggerConfig, LoggerError, LoggerStats,
    LoggerStatsSnapshot, PoolConfig, PoolMetrics, PoolMetricsSnapshot, PoolRegistry, Processor,
    Result, SamplerMetrics, ShowFlags, Sink, TextFormatter, TimestampFormat, WriterStats,
};
