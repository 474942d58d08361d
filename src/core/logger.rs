//! Main logger implementation
//!
//! A [`Logger`] is a cheap handle. Clones share the output, the dispatcher,
//! the sampler and every background thread; each clone owns its own default
//! field map, replaced (never mutated) when fields are added.
//!
//! Call path: closed/level check, sampler, then either the async dispatcher or
//! a synchronous write. FATAL and PANIC are always written synchronously, after
//! the dispatcher has drained. A write renders the entry into a pooled buffer outside
//! any lock and takes the output mutex only for the physical write.

use super::buffered_writer::{BufferedWriter, BufferedWriterConfig, WriterStats};
use super::clock::CoarseClock;
use super::config::{LoggerConfig, STDERR, STDOUT};
use super::dispatcher::{AsyncDispatcher, DispatcherConfig, Processor};
use super::error::{ErrorHandler, LoggerError, Result};
use super::formatter::{Formatter, FormatterConfig, JsonFormatter, ShowFlags, TextFormatter};
use super::hook::{Hook, HookRegistry};
use super::log_context::{CallSite, FieldValue, Fields, LogContext};
use super::log_entry::{Identity, LogEntry};
use super::log_level::LogLevel;
use super::metrics::{LoggerStats, PoolMetricsSnapshot};
use super::pool::PoolRegistry;
use super::sampling::LogSampler;
use super::sink::Sink;
use super::timestamp::TimestampFormat;
use crate::writers::{FileHook, RotatingFileWriter, RotationPolicy, StderrSink, StdoutSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::fmt;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a FATAL or PANIC entry waits for queued async jobs
const TERMINAL_DRAIN_WAIT: Duration = Duration::from_secs(5);

/// Called with exit code 1 after a FATAL or PANIC entry
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

/// Called with the populated entry before a terminal exit
pub type EntryCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

enum Output {
    Direct(Mutex<Box<dyn Sink>>),
    Buffered(BufferedWriter),
}

/// Everything a write needs; also the dispatcher's processor
struct Core {
    formatter: Box<dyn Formatter>,
    output: Output,
    hooks: HookRegistry,
    pools: Arc<PoolRegistry>,
    stats: Arc<LoggerStats>,
    error_handler: ErrorHandler,
    err_out: Arc<Mutex<Box<dyn Sink>>>,
    exit_fn: ExitFn,
    on_fatal: Option<EntryCallback>,
    on_panic: Option<EntryCallback>,
    pid: u32,
    identity: Identity,
    clock: Option<CoarseClock>,
    caller: bool,
    stack_trace_level: Option<LogLevel>,
}

impl Core {
    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Some(ref clock) => clock.now(),
            None => Utc::now(),
        }
    }

    fn report(&self, error: &LoggerError) {
        (self.error_handler)(error);
    }

    /// Build, render, emit and release one entry
    ///
    /// `layers` are merged in order, later keys overriding earlier ones.
    fn write(&self, ctx: &LogContext, level: LogLevel, message: &[u8], layers: &[&Fields]) {
        let mut entry = self.pools.get_entry();
        entry.timestamp = self.now();
        entry.level = level;
        entry.level_name = level.as_bytes();
        entry.message.extend_from_slice(message);
        entry.pid = self.pid;
        entry.identity.clone_from(&self.identity);
        for layer in layers {
            for (key, value) in layer.iter() {
                entry.fields.insert(key.clone(), value.clone());
            }
        }
        entry.apply_context(ctx);

        if self.caller {
            if let Some(site) = ctx.call_site() {
                let mut caller = self.pools.get_caller();
                caller.fill(site.location.file(), site.location.line(), site.module);
                entry.caller = Some(caller);
            }
        }

        if self.stack_trace_level.is_some_and(|min| level >= min) {
            let mut trace = self.pools.get_buffer();
            let _ = write!(trace, "{}", Backtrace::force_capture());
            entry.stack_trace = Some(trace);
        }

        let mut out = self.pools.get_buffer();
        let started = Instant::now();
        match self.formatter.format(&mut out, &entry) {
            Ok(()) => {
                let metrics = self.pools.metrics();
                metrics.record_format_time(started.elapsed());
                metrics.record_serialized();

                let started = Instant::now();
                if let Err(e) = self.write_output(&out) {
                    self.stats.record_write_error();
                    metrics.record_error();
                    self.report(&e);
                }
                metrics.record_write_time(started.elapsed());
            }
            Err(e) => {
                out.clear();
                self.stats.record_format_error();
                self.pools.metrics().record_error();
                self.report(&LoggerError::formatter(self.formatter.name(), e.to_string()));
            }
        }

        // Hooks stop at the job's deadline; the entry itself is already out
        if !self.hooks.is_empty() {
            self.hooks.fire_all(&entry, ctx, &self.error_handler, &self.stats);
        }

        self.stats.record_logged();

        let terminal = level.is_terminal();
        if terminal {
            self.terminal(&entry, &out);
        }

        self.pools.put_buffer(out);
        self.pools.put_entry(entry);

        if terminal {
            (self.exit_fn)(1);
        }
    }

    fn write_output(&self, bytes: &[u8]) -> Result<()> {
        match self.output {
            Output::Direct(ref sink) => {
                let mut sink = sink.lock();
                sink.write_all(bytes)
                    .map_err(|e| LoggerError::io_operation("writing entry", sink.name().to_string(), e))
            }
            Output::Buffered(ref writer) => writer.write(bytes),
        }
    }

    fn flush_output(&self) -> Result<()> {
        match self.output {
            Output::Direct(ref sink) => {
                let mut sink = sink.lock();
                sink.flush()
                    .map_err(|e| LoggerError::io_operation("flushing output", sink.name().to_string(), e))
            }
            Output::Buffered(ref writer) => writer.flush(),
        }
    }

    /// FATAL and PANIC: callback, flush, and for PANIC a direct copy to the
    /// error sink. The exit function runs after the entry is released.
    fn terminal(&self, entry: &LogEntry, rendered: &[u8]) {
        let callback = match entry.level {
            LogLevel::Fatal => self.on_fatal.as_ref(),
            _ => self.on_panic.as_ref(),
        };
        if let Some(callback) = callback {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(entry))) {
                self.stats.record_panic();
                self.report(&LoggerError::panic("terminal callback", payload.as_ref()));
            }
        }

        if let Err(e) = self.flush_output() {
            self.report(&e);
        }

        if entry.level == LogLevel::Panic {
            let mut err_out = self.err_out.lock();
            let _ = err_out.write_all(b"[LOGGER PANIC] ");
            if rendered.is_empty() {
                let _ = err_out.write_all(&entry.message);
                let _ = err_out.write_all(b"\n");
            } else {
                let _ = err_out.write_all(rendered);
            }
            let _ = err_out.flush();
        }
    }

    /// Close output, clock and hooks; failures are collected, not escalated
    fn close(&self) -> Vec<LoggerError> {
        let mut errors = Vec::new();

        match self.output {
            Output::Buffered(ref writer) => {
                if let Err(e) = writer.close() {
                    errors.push(e);
                }
            }
            Output::Direct(ref sink) => {
                let mut sink = sink.lock();
                let result = if sink.is_standard_stream() {
                    sink.flush()
                } else {
                    sink.close()
                };
                if let Err(e) = result {
                    errors.push(LoggerError::io_operation("closing output", sink.name().to_string(), e));
                }
            }
        }

        if let Some(ref clock) = self.clock {
            clock.stop();
        }

        errors.extend(self.hooks.close_all());

        if let Err(e) = self.err_out.lock().flush() {
            errors.push(LoggerError::io_operation("flushing error output", "err_out", e));
        }
        errors
    }
}

impl Processor for Core {
    fn log(&self, ctx: &LogContext, level: LogLevel, message: &[u8], fields: &Fields) {
        self.write(ctx, level, message, &[fields]);
    }

    fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    fn err_out(&self) -> &Mutex<Box<dyn Sink>> {
        &self.err_out
    }
}

/// State shared by a logger and all of its clones
struct Shared {
    core: Arc<Core>,
    dispatcher: Option<AsyncDispatcher>,
    sampler: LogSampler,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut errors = Vec::new();
        // Workers drain into the core, so the dispatcher goes first
        if let Some(ref dispatcher) = self.dispatcher {
            if let Err(e) = dispatcher.close() {
                errors.push(e);
            }
        }
        errors.extend(self.core.close());

        if errors.is_empty() {
            return Ok(());
        }
        for e in &errors {
            self.core.report(e);
        }
        Err(LoggerError::Shutdown {
            errors: errors.iter().map(ToString::to_string).collect(),
        })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Structured logger handle
///
/// # Example
///
/// ```
/// use pooled_logger::prelude::*;
///
/// let sink = MemorySink::new();
/// let logger = Logger::builder()
///     .level(LogLevel::Info)
///     .output(sink.clone())
///     .build()
///     .unwrap();
///
/// let request_logger = logger.with_field("request_id", "r-42");
/// request_logger.info("handled");
/// logger.debug("not shown");
/// logger.close().unwrap();
///
/// let out = sink.contents_string();
/// assert!(out.contains("handled | request_id=r-42"));
/// assert!(!out.contains("not shown"));
/// ```
pub struct Logger {
    shared: Arc<Shared>,
    fields: Arc<Fields>,
    level: AtomicU8,
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Change this handle's minimum level; clones keep their own
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        !self.shared.closed.load(Ordering::Relaxed) && level >= self.level()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Default fields attached to every entry from this handle
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Derive a logger with one more default field
    ///
    /// Shares output and background threads; the field map is copied so
    /// neither logger sees the other's later additions.
    #[must_use]
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<FieldValue>) -> Logger {
        let mut fields = Fields::clone(&self.fields);
        fields.insert(key.into(), value.into());
        self.derive(fields)
    }

    #[must_use]
    pub fn with_fields<I, K, V>(&self, extra: I) -> Logger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut fields = Fields::clone(&self.fields);
        fields.extend(extra.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.derive(fields)
    }

    fn derive(&self, fields: Fields) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            fields: Arc::new(fields),
            level: AtomicU8::new(self.level.load(Ordering::Relaxed)),
        }
    }

    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.shared.core.hooks.add(hook);
    }

    #[track_caller]
    pub fn log(&self, level: LogLevel, message: impl AsRef<[u8]>) {
        let site = CallSite::here("");
        self.dispatch(LogContext::new().with_call_site(site), level, message.as_ref(), &Fields::new());
    }

    /// Log with per-call fields
    #[track_caller]
    pub fn log_fields(&self, level: LogLevel, message: impl AsRef<[u8]>, fields: &Fields) {
        let site = CallSite::here("");
        self.dispatch(LogContext::new().with_call_site(site), level, message.as_ref(), fields);
    }

    /// Log with a context and per-call fields
    #[track_caller]
    pub fn log_ctx(&self, ctx: LogContext, level: LogLevel, message: impl AsRef<[u8]>, fields: &Fields) {
        let ctx = match ctx.call_site() {
            Some(_) => ctx,
            None => ctx.with_call_site(CallSite::here("")),
        };
        self.dispatch(ctx, level, message.as_ref(), fields);
    }

    /// Macro entry point; formats only when the level is enabled
    #[doc(hidden)]
    pub fn log_args(&self, site: CallSite, level: LogLevel, fields: &Fields, args: fmt::Arguments<'_>) {
        if !self.is_enabled(level) {
            if !self.is_closed() {
                self.shared.core.stats.record_filtered();
            }
            return;
        }
        let ctx = LogContext::new().with_call_site(site);
        match args.as_str() {
            Some(literal) => self.dispatch(ctx, level, literal.as_bytes(), fields),
            None => {
                let mut buf = self.shared.core.pools.buffer();
                let _ = buf.write_fmt(args);
                self.dispatch(ctx, level, &buf, fields);
            }
        }
    }

    fn dispatch(&self, ctx: LogContext, level: LogLevel, message: &[u8], fields: &Fields) {
        let shared = &*self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        let core = &shared.core;
        if level < self.level() {
            core.stats.record_filtered();
            return;
        }
        // Terminal levels are never sampled away
        if !level.is_terminal() && !shared.sampler.should_sample() {
            core.stats.record_sampled_out();
            return;
        }

        match shared.dispatcher {
            Some(ref dispatcher) if !level.is_terminal() => {
                if self.fields.is_empty() {
                    dispatcher.log(ctx, level, message, fields);
                } else if fields.is_empty() {
                    dispatcher.log(ctx, level, message, &self.fields);
                } else {
                    let mut merged = core.pools.get_map();
                    for (key, value) in self.fields.iter().chain(fields.iter()) {
                        merged.insert(key.clone(), value.clone());
                    }
                    dispatcher.log(ctx, level, message, &merged);
                    core.pools.put_map(merged);
                }
            }
            Some(ref dispatcher) => {
                // Earlier entries must be out before the terminal one and the exit
                if !dispatcher.drain(TERMINAL_DRAIN_WAIT) {
                    core.report(&LoggerError::other(
                        "async queue not drained before terminal entry",
                    ));
                }
                core.write(&ctx, level, message, &[&*self.fields, fields]);
            }
            None => core.write(&ctx, level, message, &[&*self.fields, fields]),
        }
    }

    #[inline]
    #[track_caller]
    pub fn trace(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Trace, message);
    }

    #[inline]
    #[track_caller]
    pub fn debug(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Debug, message);
    }

    #[inline]
    #[track_caller]
    pub fn info(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Info, message);
    }

    #[inline]
    #[track_caller]
    pub fn warn(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Warn, message);
    }

    #[inline]
    #[track_caller]
    pub fn error(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Error, message);
    }

    /// Waits for queued async entries, logs, runs the fatal callback, then
    /// calls the exit function
    #[inline]
    #[track_caller]
    pub fn fatal(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Fatal, message);
    }

    /// Logs, runs the panic callback, copies the entry to the error sink, then
    /// calls the exit function. Does not unwind.
    #[inline]
    #[track_caller]
    pub fn panic(&self, message: impl AsRef<[u8]>) {
        self.log(LogLevel::Panic, message);
    }

    /// Flush the output
    ///
    /// Jobs still queued in the async dispatcher are not waited for; use
    /// [`close`](Self::close) for a full drain.
    pub fn flush(&self) -> Result<()> {
        self.shared.core.flush_output()
    }

    /// Drain and close everything; idempotent
    ///
    /// Closes the dispatcher, then the output, clock and hooks. Each failure is
    /// reported to the error handler and collected into
    /// [`LoggerError::Shutdown`]; every component is closed regardless.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    pub fn stats(&self) -> &LoggerStats {
        &self.shared.core.stats
    }

    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.shared.core.pools.metrics().snapshot()
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.shared.core.pools
    }

    pub fn sampler(&self) -> &LogSampler {
        &self.shared.sampler
    }

    /// Buffered output counters, when output is buffered
    pub fn writer_stats(&self) -> Option<WriterStats> {
        match self.shared.core.output {
            Output::Buffered(ref writer) => Some(writer.stats()),
            Output::Direct(_) => None,
        }
    }

    /// Jobs waiting in the async queue
    pub fn pending_jobs(&self) -> usize {
        self.shared.dispatcher.as_ref().map_or(0, AsyncDispatcher::pending)
    }

    pub fn is_async(&self) -> bool {
        self.shared.dispatcher.is_some()
    }
}

impl Clone for Logger {
    /// Shallow copy: shared output and workers, same default fields
    fn clone(&self) -> Self {
        Logger {
            shared: Arc::clone(&self.shared),
            fields: Arc::clone(&self.fields),
            level: AtomicU8::new(self.level.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("fields", &self.fields.len())
            .field("formatter", &self.shared.core.formatter.name())
            .field("async", &self.is_async())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for constructing a [`Logger`] with a fluent API
///
/// # Example
///
/// ```
/// use pooled_logger::prelude::*;
/// use std::time::Duration;
///
/// let logger = Logger::builder()
///     .level(LogLevel::Debug)
///     .output(MemorySink::new())
///     .json()
///     .sampling(10)
///     .async_mode(DispatcherConfig { worker_count: 2, ..DispatcherConfig::default() })
///     .buffered(BufferedWriterConfig {
///         batch_size: 32,
///         flush_interval: Duration::from_millis(200),
///         ..BufferedWriterConfig::default()
///     })
///     .field("service", "checkout")
///     .build()
///     .unwrap();
///
/// logger.info("ready");
/// logger.close().unwrap();
/// ```
pub struct LoggerBuilder {
    level: LogLevel,
    output: Option<Box<dyn Sink>>,
    output_file: Option<(PathBuf, RotationPolicy)>,
    err_out: Option<Box<dyn Sink>>,
    formatter: Option<Box<dyn Formatter>>,
    formatter_config: FormatterConfig,
    json: bool,
    caller: bool,
    stack_trace_level: Option<LogLevel>,
    buffer: Option<BufferedWriterConfig>,
    sampling_rate: u64,
    async_config: Option<DispatcherConfig>,
    hooks: Vec<Arc<dyn Hook>>,
    file_hook: Option<(PathBuf, LogLevel)>,
    exit_fn: Option<ExitFn>,
    error_handler: Option<ErrorHandler>,
    on_fatal: Option<EntryCallback>,
    on_panic: Option<EntryCallback>,
    pools: Option<Arc<PoolRegistry>>,
    fields: Fields,
    identity: Identity,
    clock_resolution: Option<Duration>,
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            level: LogLevel::Info,
            output: None,
            output_file: None,
            err_out: None,
            formatter: None,
            formatter_config: FormatterConfig::default(),
            json: false,
            caller: true,
            stack_trace_level: None,
            buffer: None,
            sampling_rate: 0,
            async_config: None,
            hooks: Vec::new(),
            file_hook: None,
            exit_fn: None,
            error_handler: None,
            on_fatal: None,
            on_panic: None,
            pools: None,
            fields: Fields::new(),
            identity: Identity::default(),
            clock_resolution: None,
        }
    }

    /// Start from a declarative configuration
    pub fn from_config(config: &LoggerConfig) -> Result<Self> {
        config.validate()?;

        let mut formatter_config = FormatterConfig::new()
            .with_timestamp_format(config.timestamp_format.clone())
            .with_show(config.show)
            .with_mask(config.mask.clone())
            .with_colors(config.colors);
        for key in &config.sensitive_keys {
            formatter_config = formatter_config.with_sensitive_key(key.clone());
        }

        let mut builder = Self::new()
            .level(config.level)
            .formatter_config(formatter_config)
            .caller(config.caller)
            .sampling(config.sampling_rate);
        builder.json = config.formatter == "json";
        builder.stack_trace_level = config.stack_trace_level;

        builder = match config.output.as_str() {
            STDOUT => builder.output(StdoutSink::new()),
            STDERR => builder.output(StderrSink::new()),
            path => builder.output_file(
                path,
                config.rotation.clone().unwrap_or_else(RotationPolicy::never),
            ),
        };
        builder = match config.error_output.as_str() {
            STDOUT => builder.error_output(StdoutSink::new()),
            STDERR => builder.error_output(StderrSink::new()),
            path => builder.error_output(RotatingFileWriter::with_policy(path, RotationPolicy::never())?),
        };

        if let Some(buffer) = config.buffer {
            builder = builder.buffered(BufferedWriterConfig {
                queue_size: buffer.queue_size,
                batch_size: buffer.batch_size,
                flush_interval: Duration::from_millis(buffer.flush_interval_ms),
                batch_timeout: Duration::from_millis(buffer.batch_timeout_ms),
            });
        }
        if let Some(async_mode) = config.async_mode {
            builder = builder.async_mode(DispatcherConfig {
                worker_count: async_mode.worker_count,
                queue_size: async_mode.queue_size,
                job_timeout: Duration::from_millis(async_mode.job_timeout_ms),
                disable_timeout: async_mode.disable_timeout,
            });
        }
        if let Some(ms) = config.clock_resolution_ms {
            builder = builder.coarse_clock(Duration::from_millis(ms));
        }
        if let Some(ref hook) = config.file_hook {
            builder = builder.file_hook(&hook.path, hook.level);
        }

        builder.identity = Identity {
            hostname: config.hostname.as_deref().map(Arc::from),
            app: config.app.as_deref().map(Arc::from),
            version: config.version.as_deref().map(Arc::from),
            environment: config.environment.as_deref().map(Arc::from),
        };
        Ok(builder)
    }

    #[must_use = "builder methods return a new value"]
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn output(mut self, sink: impl Sink + 'static) -> Self {
        self.output = Some(Box::new(sink));
        self.output_file = None;
        self
    }

    /// Write to a rotating file opened at build time
    #[must_use = "builder methods return a new value"]
    pub fn output_file(mut self, path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        self.output_file = Some((path.into(), policy));
        self.output = None;
        self
    }

    /// Destination of internal diagnostics; stderr by default
    #[must_use = "builder methods return a new value"]
    pub fn error_output(mut self, sink: impl Sink + 'static) -> Self {
        self.err_out = Some(Box::new(sink));
        self
    }

    /// Custom formatter; overrides `json`/`text` and the formatter options
    #[must_use = "builder methods return a new value"]
    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Some(Box::new(formatter));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn formatter_config(mut self, config: FormatterConfig) -> Self {
        self.formatter_config = config;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn text(mut self) -> Self {
        self.json = false;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn colors(mut self, enabled: bool) -> Self {
        self.formatter_config.colors = enabled;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.formatter_config.timestamp_format = format;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn show(mut self, show: ShowFlags) -> Self {
        self.formatter_config.show = show;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn mask(mut self, mask: impl Into<String>) -> Self {
        self.formatter_config.mask = mask.into();
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn sensitive_key(mut self, key: impl Into<String>) -> Self {
        self.formatter_config.sensitive_keys.push(key.into());
        self
    }

    /// Record the call site of each entry
    #[must_use = "builder methods return a new value"]
    pub fn caller(mut self, enabled: bool) -> Self {
        self.caller = enabled;
        self
    }

    /// Capture a stack trace for entries at or above `level`
    #[must_use = "builder methods return a new value"]
    pub fn stack_traces(mut self, level: LogLevel) -> Self {
        self.stack_trace_level = Some(level);
        self
    }

    /// Route output through a [`BufferedWriter`]
    #[must_use = "builder methods return a new value"]
    pub fn buffered(mut self, config: BufferedWriterConfig) -> Self {
        self.buffer = Some(config);
        self
    }

    /// Keep one in `rate` non-terminal calls
    #[must_use = "builder methods return a new value"]
    pub fn sampling(mut self, rate: u64) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Process entries on an [`AsyncDispatcher`]
    #[must_use = "builder methods return a new value"]
    pub fn async_mode(mut self, config: DispatcherConfig) -> Self {
        self.async_config = Some(config);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Built-in JSON-lines hook for entries at or above `level`
    #[must_use = "builder methods return a new value"]
    pub fn file_hook(mut self, path: impl Into<PathBuf>, level: LogLevel) -> Self {
        self.file_hook = Some((path.into(), level));
        self
    }

    /// Replace process termination after FATAL/PANIC
    #[must_use = "builder methods return a new value"]
    pub fn exit_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit_fn = Some(Arc::new(f));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&LoggerError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(f));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn on_fatal<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.on_fatal = Some(Arc::new(f));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn on_panic<F>(mut self, f: F) -> Self
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(f));
        self
    }

    /// Share a pool registry with other components
    #[must_use = "builder methods return a new value"]
    pub fn pools(mut self, pools: Arc<PoolRegistry>) -> Self {
        self.pools = Some(pools);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn app(mut self, app: &str) -> Self {
        self.identity.app = Some(Arc::from(app));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn version(mut self, version: &str) -> Self {
        self.identity.version = Some(Arc::from(version));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn environment(mut self, environment: &str) -> Self {
        self.identity.environment = Some(Arc::from(environment));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.identity.hostname = Some(Arc::from(hostname));
        self
    }

    /// Timestamp entries from a cached clock refreshed every `resolution`
    #[must_use = "builder methods return a new value"]
    pub fn coarse_clock(mut self, resolution: Duration) -> Self {
        self.clock_resolution = Some(resolution);
        self
    }

    /// Build the logger and start its background threads
    pub fn build(self) -> Result<Logger> {
        if let Some(ref config) = self.async_config {
            config.validate()?;
        }
        if let Some(ref config) = self.buffer {
            config.validate()?;
        }

        let pools = self.pools.unwrap_or_default();
        let stats = Arc::new(LoggerStats::new());

        let err_out: Arc<Mutex<Box<dyn Sink>>> = Arc::new(Mutex::new(
            self.err_out.unwrap_or_else(|| Box::new(StderrSink::new())),
        ));
        let error_handler = match self.error_handler {
            Some(handler) => handler,
            None => default_error_handler(Arc::clone(&err_out)),
        };

        let formatter: Box<dyn Formatter> = match self.formatter {
            Some(formatter) => formatter,
            None if self.json => Box::new(JsonFormatter::with_config(self.formatter_config)),
            None => Box::new(TextFormatter::with_config(self.formatter_config)),
        };

        let sink: Box<dyn Sink> = match (self.output, self.output_file) {
            (Some(sink), _) => sink,
            (None, Some((path, policy))) => Box::new(RotatingFileWriter::with_policy(path, policy)?),
            (None, None) => Box::new(StdoutSink::new()),
        };
        let output = match self.buffer {
            Some(config) => Output::Buffered(BufferedWriter::new(
                sink,
                config,
                Arc::clone(&pools),
                Arc::clone(&error_handler),
            )?),
            None => Output::Direct(Mutex::new(sink)),
        };

        let hooks = HookRegistry::new();
        for hook in self.hooks {
            hooks.add(hook);
        }
        if let Some((path, level)) = self.file_hook {
            hooks.add(Arc::new(FileHook::open(path, level)?));
        }

        let clock = match self.clock_resolution {
            Some(resolution) => Some(CoarseClock::start(resolution).map_err(|e| {
                LoggerError::io_operation("starting clock thread", "coarse clock", e)
            })?),
            None => None,
        };

        let core = Arc::new(Core {
            formatter,
            output,
            hooks,
            pools: Arc::clone(&pools),
            stats: Arc::clone(&stats),
            error_handler,
            err_out,
            exit_fn: self
                .exit_fn
                .unwrap_or_else(|| Arc::new(|code| std::process::exit(code))),
            on_fatal: self.on_fatal,
            on_panic: self.on_panic,
            pid: std::process::id(),
            identity: self.identity,
            clock,
            caller: self.caller,
            stack_trace_level: self.stack_trace_level,
        });

        let dispatcher = match self.async_config {
            Some(config) => {
                let processor: Arc<dyn Processor> = core.clone();
                Some(AsyncDispatcher::new(config, processor, pools, stats)?)
            }
            None => None,
        };

        Ok(Logger {
            shared: Arc::new(Shared {
                core,
                dispatcher,
                sampler: LogSampler::new(self.sampling_rate),
                closed: AtomicBool::new(false),
            }),
            fields: Arc::new(self.fields),
            level: AtomicU8::new(self.level as u8),
        })
    }
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `[LOGGER ERROR] <error>` lines to the error sink
fn default_error_handler(err_out: Arc<Mutex<Box<dyn Sink>>>) -> ErrorHandler {
    Arc::new(move |error: &LoggerError| {
        let line = format!("[LOGGER ERROR] {}\n", error);
        let mut sink = err_out.lock();
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writers::MemorySink;
    use std::sync::atomic::AtomicI32;

    fn memory_logger(level: LogLevel) -> (Logger, MemorySink) {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .level(level)
            .output(sink.clone())
            .show(ShowFlags::minimal())
            .build()
            .unwrap();
        (logger, sink)
    }

    #[test]
    fn test_level_filtering() {
        let (logger, sink) = memory_logger(LogLevel::Warn);
        logger.info("x");
        logger.warn("y");
        logger.close().unwrap();

        assert_eq!(sink.contents_string(), "[WARN ] y\n");
        let stats = logger.stats().snapshot();
        assert_eq!(stats.logged, 1);
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn test_set_level_is_per_handle() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        let verbose = logger.clone();
        verbose.set_level(LogLevel::Trace);

        logger.debug("hidden");
        verbose.debug("shown");
        assert_eq!(logger.level(), LogLevel::Info);
        logger.close().unwrap();
        assert_eq!(sink.lines(), vec!["[DEBUG] shown".to_string()]);
    }

    #[test]
    fn test_with_field_copy_on_write() {
        let sink = MemorySink::new();
        let base = Logger::builder()
            .output(sink.clone())
            .show(ShowFlags {
                timestamp: false,
                caller: false,
                ..ShowFlags::default()
            })
            .field("svc", "api")
            .build()
            .unwrap();

        let a = base.with_field("user", "alice");
        let b = base.with_field("user", "bob").with_field("extra", 1);

        assert_eq!(base.fields().len(), 1);
        assert_eq!(a.fields().get("user"), Some(&FieldValue::from("alice")));
        assert!(a.fields().get("extra").is_none());
        assert_eq!(b.fields().len(), 3);

        a.info("from a");
        base.close().unwrap();

        assert_eq!(sink.contents_string(), "[INFO ] from a | svc=api user=alice\n");
        // Closing any handle closes the shared core
        assert!(b.is_closed());
    }

    #[test]
    fn test_call_fields_override_defaults() {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .output(sink.clone())
            .json()
            .field("k", "default")
            .field("kept", true)
            .build()
            .unwrap();

        let mut fields = Fields::new();
        fields.insert("k".into(), "call".into());
        logger.log_fields(LogLevel::Info, "m", &fields);
        logger.close().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&sink.contents()).unwrap();
        assert_eq!(value["k"], "call");
        assert_eq!(value["kept"], true);
    }

    #[test]
    fn test_caller_captured() {
        let sink = MemorySink::new();
        let logger = Logger::builder().output(sink.clone()).json().build().unwrap();
        let line = line!() + 1;
        logger.info("where");
        logger.close().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&sink.contents()).unwrap();
        assert_eq!(value["caller"]["line"], line);
        assert!(value["caller"]["file"].as_str().unwrap().ends_with("logger.rs"));
    }

    #[test]
    fn test_close_idempotent_and_silences_logging() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        logger.info("one");
        logger.close().unwrap();
        logger.close().unwrap();
        logger.error("after close");

        assert_eq!(sink.write_count(), 1);
        assert!(sink.is_closed());
        assert!(!logger.is_enabled(LogLevel::Panic));
    }

    #[test]
    fn test_fatal_calls_callback_then_exit_fn() {
        let sink = MemorySink::new();
        let exit_code = Arc::new(AtomicI32::new(0));
        let seen = Arc::new(Mutex::new(String::new()));

        let code = Arc::clone(&exit_code);
        let seen_in = Arc::clone(&seen);
        let logger = Logger::builder()
            .output(sink.clone())
            .sampling(1000)
            .on_fatal(move |entry: &LogEntry| *seen_in.lock() = entry.message_str().into_owned())
            .exit_fn(move |c| code.store(c, Ordering::SeqCst))
            .build()
            .unwrap();

        logger.info("sampled in");
        logger.fatal("disk gone");

        assert_eq!(exit_code.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), "disk gone");
        assert!(sink.contents_string().contains("disk gone"));
        logger.close().unwrap();
    }

    #[test]
    fn test_panic_level_writes_to_error_sink() {
        let sink = MemorySink::new();
        let err_sink = MemorySink::new();
        let exits = Arc::new(AtomicI32::new(0));
        let counter = Arc::clone(&exits);

        let logger = Logger::builder()
            .output(sink.clone())
            .error_output(err_sink.clone())
            .show(ShowFlags::minimal())
            .exit_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        logger.panic("invariant broken");
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert_eq!(sink.contents_string(), "[PANIC] invariant broken\n");
        assert_eq!(err_sink.contents_string(), "[LOGGER PANIC] [PANIC] invariant broken\n");
        logger.close().unwrap();
    }

    #[test]
    fn test_write_error_reported_to_handler() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        let logger = Logger::builder()
            .output(MemorySink::new().failing())
            .error_handler(move |e| seen.lock().push(e.to_string()))
            .build()
            .unwrap();

        logger.info("lost");
        assert_eq!(errors.lock().len(), 1);
        assert!(errors.lock()[0].contains("writing entry"));
        assert_eq!(logger.stats().snapshot().write_errors, 1);
        logger.close().unwrap();
    }

    #[test]
    fn test_default_error_handler_writes_prefixed_line() {
        let err_sink = MemorySink::new();
        let logger = Logger::builder()
            .output(MemorySink::new().failing())
            .error_output(err_sink.clone())
            .build()
            .unwrap();

        logger.warn("lost");
        logger.close().unwrap();
        assert!(err_sink
            .contents_string()
            .starts_with("[LOGGER ERROR] IO error while writing entry: memory"));
    }

    #[test]
    fn test_stack_trace_for_errors() {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .output(sink.clone())
            .json()
            .stack_traces(LogLevel::Error)
            .build()
            .unwrap();

        logger.warn("no trace");
        logger.error("with trace");
        logger.close().unwrap();

        let lines: Vec<serde_json::Value> = sink
            .lines()
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert!(lines[0].get("stack_trace").is_none());
        assert!(lines[1]["stack_trace"].is_string());
    }

    #[test]
    fn test_identity_and_coarse_clock() {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .output(sink.clone())
            .json()
            .app("billing")
            .version("1.2.3")
            .environment("test")
            .coarse_clock(Duration::from_millis(1))
            .build()
            .unwrap();

        logger.info("stamped");
        logger.close().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&sink.contents()).unwrap();
        assert_eq!(value["app"], "billing");
        assert_eq!(value["version"], "1.2.3");
        assert_eq!(value["environment"], "test");
        assert!(value["timestamp"].as_str().unwrap().starts_with("20"));
    }

    #[test]
    fn test_entries_return_to_pool() {
        let (logger, _sink) = memory_logger(LogLevel::Info);
        for i in 0..50 {
            logger.info(format!("message {}", i));
        }
        let metrics = logger.pool_metrics();
        assert_eq!(metrics.entries_created, 1);
        assert_eq!(metrics.entries_reused, 49);
        assert_eq!(metrics.entries_released, 50);
        logger.close().unwrap();
    }
}
