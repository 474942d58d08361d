//! Core logger types and traits

pub mod buffered_writer;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod formatter;
pub mod hook;
pub mod log_context;
pub mod log_entry;
pub mod log_level;
pub mod logger;
pub mod metrics;
pub mod pool;
pub mod sampling;
pub mod sink;
pub mod timestamp;

pub use buffered_writer::{BufferedWriter, BufferedWriterConfig, WriterStats};
pub use clock::CoarseClock;
pub use config::{AsyncSettings, BufferSettings, FileHookSettings, LoggerConfig};
pub use dispatcher::{AsyncDispatcher, DispatcherConfig, Job, Processor};
pub use error::{ErrorHandler, LoggerError, Result};
pub use formatter::{Formatter, FormatterConfig, JsonFormatter, ShowFlags, TextFormatter};
pub use hook::{FnHook, Hook, HookRegistry};
pub use log_context::{CallSite, FieldValue, Fields, LogContext};
pub use log_entry::{CallerInfo, Identity, LogEntry};
pub use log_level::LogLevel;
pub use logger::{EntryCallback, ExitFn, Logger, LoggerBuilder};
pub use metrics::{LoggerStats, LoggerStatsSnapshot, PoolMetrics, PoolMetricsSnapshot};
pub use pool::{PoolConfig, PoolRegistry, PooledBuffer, PooledEntry, TieredPool};
pub use sampling::{LogSampler, SamplerMetrics};
pub use sink::Sink;
pub use timestamp::TimestampFormat;
