//! Asynchronous job dispatch
//!
//! [`AsyncDispatcher`] decouples log submission from processing: callers push
//! [`Job`]s onto a bounded channel and `worker_count` threads hand them to a
//! [`Processor`]. A full queue drops the job and reports backpressure; it
//! never blocks the caller.
//!
//! Lifecycle is `Open -> Closed`. `close` stops intake, lets the workers
//! drain every job already queued, then joins them.

use super::error::{ErrorHandler, LoggerError, Result};
use super::log_context::{Fields, LogContext};
use super::log_level::LogLevel;
use super::metrics::LoggerStats;
use super::pool::PoolRegistry;
use super::sink::Sink;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Downstream consumer of dispatched jobs
pub trait Processor: Send + Sync {
    /// Process one job; `ctx` carries the per-job deadline when enabled
    fn log(&self, ctx: &LogContext, level: LogLevel, message: &[u8], fields: &Fields);

    fn error_handler(&self) -> &ErrorHandler;

    /// Error sink, guarded by the mutex every internal diagnostic writes under
    fn err_out(&self) -> &Mutex<Box<dyn Sink>>;
}

/// One unit of async work
///
/// The message is a private copy held in a pooled buffer; the field map is
/// pooled too. Both return to the pool once the job is consumed or dropped.
#[derive(Debug)]
pub struct Job {
    pub level: LogLevel,
    pub message: Vec<u8>,
    pub fields: Fields,
    pub ctx: LogContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    /// Deadline applied to each job's context; zero disables it
    pub job_timeout: Duration,
    pub disable_timeout: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 1024,
            job_timeout: Duration::from_secs(5),
            disable_timeout: false,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(LoggerError::config(
                "AsyncDispatcher",
                "worker_count must be greater than 0",
            ));
        }
        if self.queue_size == 0 {
            return Err(LoggerError::config(
                "AsyncDispatcher",
                "queue_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Jobs accepted but not yet fully processed
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.lock.lock();
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while self.count.load(Ordering::Acquire) > 0 {
            if self.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.count.load(Ordering::Acquire) == 0;
            }
        }
        true
    }
}

pub struct AsyncDispatcher {
    sender: RwLock<Option<Sender<Job>>>,
    in_flight: Arc<InFlight>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    processor: Arc<dyn Processor>,
    pools: Arc<PoolRegistry>,
    stats: Arc<LoggerStats>,
    config: DispatcherConfig,
}

impl AsyncDispatcher {
    /// Spawn the worker threads
    pub fn new(
        config: DispatcherConfig,
        processor: Arc<dyn Processor>,
        pools: Arc<PoolRegistry>,
        stats: Arc<LoggerStats>,
    ) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = bounded::<Job>(config.queue_size);
        let in_flight = Arc::new(InFlight::default());
        let mut workers = Vec::with_capacity(config.worker_count);

        for id in 0..config.worker_count {
            let worker = Worker {
                id,
                receiver: receiver.clone(),
                in_flight: Arc::clone(&in_flight),
                processor: Arc::clone(&processor),
                pools: Arc::clone(&pools),
                stats: Arc::clone(&stats),
                config,
            };
            let handle = thread::Builder::new()
                .name(format!("logger-worker-{}", id))
                .spawn(move || worker.run())
                .map_err(|e| {
                    LoggerError::io_operation("spawning worker", format!("worker {}", id), e)
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            in_flight,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            processor,
            pools,
            stats,
            config,
        })
    }

    /// Enqueue a job without blocking
    ///
    /// The message and fields are copied into pooled storage, so the caller may
    /// reuse its buffers as soon as this returns. A no-op once closed.
    pub fn log(&self, ctx: LogContext, level: LogLevel, message: &[u8], fields: &Fields) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return;
        };

        let mut copy = self.pools.get_buffer();
        copy.extend_from_slice(message);
        let mut job_fields = self.pools.get_map();
        for (key, value) in fields {
            job_fields.insert(key.clone(), value.clone());
        }

        let job = Job {
            level,
            message: copy,
            fields: job_fields,
            ctx,
        };

        self.in_flight.begin();
        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.in_flight.end();
                let depth = sender.len();
                self.recycle(job);
                self.stats.record_async_dropped();
                (self.processor.error_handler())(&LoggerError::queue_full(
                    depth,
                    self.config.queue_size,
                ));
            }
            Err(TrySendError::Disconnected(job)) => {
                self.in_flight.end();
                self.recycle(job);
            }
        }
    }

    fn recycle(&self, job: Job) {
        self.pools.put_buffer(job.message);
        self.pools.put_map(job.fields);
    }

    /// Jobs waiting in the queue
    pub fn pending(&self) -> usize {
        self.sender.read().as_ref().map_or(0, Sender::len)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Block until every accepted job has been processed, or `timeout` passes
    ///
    /// Intake stays open. Returns false on timeout, which is what a worker
    /// calling this on its own behalf will see.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Stop intake, drain queued jobs and join the workers; idempotent
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        // Dropping the last sender lets workers exit once the queue is empty
        drop(self.sender.write().take());

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let mut errors = Vec::new();
        for (id, handle) in handles.into_iter().enumerate() {
            if let Err(payload) = handle.join() {
                errors.push(
                    LoggerError::panic(format!("async worker {}", id), payload.as_ref()).to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoggerError::Shutdown { errors })
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            eprintln!("[LOGGER ERROR] Dispatcher shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Worker {
    id: usize,
    receiver: Receiver<Job>,
    in_flight: Arc<InFlight>,
    processor: Arc<dyn Processor>,
    pools: Arc<PoolRegistry>,
    stats: Arc<LoggerStats>,
    config: DispatcherConfig,
}

impl Worker {
    fn run(self) {
        // recv fails only once the channel is closed and empty
        while let Ok(job) = self.receiver.recv() {
            self.process(job);
        }
    }

    fn process(&self, job: Job) {
        let Job {
            level,
            message,
            fields,
            ctx,
        } = job;

        let ctx = if self.config.disable_timeout || self.config.job_timeout.is_zero() {
            ctx
        } else {
            ctx.with_timeout(self.config.job_timeout)
        };

        // Recovery is per job so one bad job never stops this worker
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.processor.log(&ctx, level, &message, &fields);
        }));

        if let Err(payload) = result {
            self.stats.record_panic();
            let error = LoggerError::panic(format!("async worker {}", self.id), payload.as_ref());
            (self.processor.error_handler())(&error);

            let trace = Backtrace::force_capture();
            let mut err_out = self.processor.err_out().lock();
            let report = format!(
                "[LOGGER CRITICAL] Async worker {} recovered from panic: {}\n{}\n",
                self.id,
                crate::core::error::panic_message(payload.as_ref()),
                trace
            );
            let _ = err_out.write_all(report.as_bytes());
            let _ = err_out.flush();
        }

        self.pools.put_buffer(message);
        self.pools.put_map(fields);
        self.in_flight.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writers::MemorySink;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        seen: Mutex<Vec<(LogLevel, String)>>,
        errors: Arc<Mutex<Vec<String>>>,
        handler: ErrorHandler,
        err_out: Mutex<Box<dyn Sink>>,
        err_mem: MemorySink,
        panics_on: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(panics_on: Option<&'static str>) -> Arc<Self> {
            let errors = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&errors);
            let err_mem = MemorySink::new();
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                errors,
                handler: Arc::new(move |e: &LoggerError| sink.lock().push(e.to_string())),
                err_out: Mutex::new(Box::new(err_mem.clone())),
                err_mem,
                panics_on,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Processor for Recorder {
        fn log(&self, ctx: &LogContext, level: LogLevel, message: &[u8], _fields: &Fields) {
            assert!(ctx.deadline().is_some());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8_lossy(message).into_owned();
            if Some(text.as_str()) == self.panics_on {
                panic!("processor failed on {}", text);
            }
            self.seen.lock().push((level, text));
        }

        fn error_handler(&self) -> &ErrorHandler {
            &self.handler
        }

        fn err_out(&self) -> &Mutex<Box<dyn Sink>> {
            &self.err_out
        }
    }

    fn dispatcher(config: DispatcherConfig, processor: Arc<Recorder>) -> AsyncDispatcher {
        AsyncDispatcher::new(
            config,
            processor,
            Arc::new(PoolRegistry::new()),
            Arc::new(LoggerStats::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = DispatcherConfig {
            worker_count: 0,
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LoggerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_close_drains_queued_jobs() {
        let recorder = Recorder::new(None);
        let config = DispatcherConfig {
            worker_count: 1,
            queue_size: 128,
            ..DispatcherConfig::default()
        };
        let d = dispatcher(config, Arc::clone(&recorder));

        for i in 0..100 {
            d.log(LogContext::new(), LogLevel::Info, format!("m{}", i).as_bytes(), &Fields::new());
        }
        d.close().unwrap();

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 100);
        // Single worker preserves queue order
        assert_eq!(seen[0].1, "m0");
        assert_eq!(seen[99].1, "m99");
    }

    #[test]
    fn test_drain_waits_for_accepted_jobs() {
        let recorder = Recorder::new(None);
        let config = DispatcherConfig {
            worker_count: 1,
            queue_size: 64,
            ..DispatcherConfig::default()
        };
        let d = dispatcher(config, Arc::clone(&recorder));

        for i in 0..50 {
            d.log(LogContext::new(), LogLevel::Info, format!("m{}", i).as_bytes(), &Fields::new());
        }
        assert!(d.drain(Duration::from_secs(5)));
        assert_eq!(recorder.seen.lock().len(), 50);
        assert!(!d.is_closed());

        // still accepting after a drain
        d.log(LogContext::new(), LogLevel::Info, b"later", &Fields::new());
        d.close().unwrap();
        assert_eq!(recorder.seen.lock().len(), 51);
    }

    #[test]
    fn test_drain_times_out_on_stuck_job() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        struct Stuck {
            release: Receiver<()>,
            handler: ErrorHandler,
            err_out: Mutex<Box<dyn Sink>>,
        }

        impl Processor for Stuck {
            fn log(&self, _ctx: &LogContext, _level: LogLevel, _message: &[u8], _fields: &Fields) {
                let _ = self.release.recv();
            }
            fn error_handler(&self) -> &ErrorHandler {
                &self.handler
            }
            fn err_out(&self) -> &Mutex<Box<dyn Sink>> {
                &self.err_out
            }
        }

        let d = AsyncDispatcher::new(
            DispatcherConfig {
                worker_count: 1,
                ..DispatcherConfig::default()
            },
            Arc::new(Stuck {
                release: release_rx,
                handler: Arc::new(|_: &LoggerError| {}),
                err_out: Mutex::new(Box::new(MemorySink::new())),
            }),
            Arc::new(PoolRegistry::new()),
            Arc::new(LoggerStats::new()),
        )
        .unwrap();

        d.log(LogContext::new(), LogLevel::Info, b"stuck", &Fields::new());
        assert!(!d.drain(Duration::from_millis(20)));

        release_tx.send(()).unwrap();
        assert!(d.drain(Duration::from_secs(5)));
        d.close().unwrap();
    }

    #[test]
    fn test_zero_job_timeout_disables_deadline() {
        struct DeadlineCheck {
            handler: ErrorHandler,
            err_out: Mutex<Box<dyn Sink>>,
            deadlines: Mutex<Vec<bool>>,
        }

        impl Processor for DeadlineCheck {
            fn log(&self, ctx: &LogContext, _level: LogLevel, _message: &[u8], _fields: &Fields) {
                self.deadlines.lock().push(ctx.deadline().is_some());
            }
            fn error_handler(&self) -> &ErrorHandler {
                &self.handler
            }
            fn err_out(&self) -> &Mutex<Box<dyn Sink>> {
                &self.err_out
            }
        }

        let processor = Arc::new(DeadlineCheck {
            handler: Arc::new(|_: &LoggerError| {}),
            err_out: Mutex::new(Box::new(MemorySink::new())),
            deadlines: Mutex::new(Vec::new()),
        });
        let d = AsyncDispatcher::new(
            DispatcherConfig {
                job_timeout: Duration::ZERO,
                ..DispatcherConfig::default()
            },
            Arc::clone(&processor) as Arc<dyn Processor>,
            Arc::new(PoolRegistry::new()),
            Arc::new(LoggerStats::new()),
        )
        .unwrap();

        d.log(LogContext::new(), LogLevel::Info, b"no deadline", &Fields::new());
        d.close().unwrap();
        assert_eq!(*processor.deadlines.lock(), vec![false]);
    }

    #[test]
    fn test_log_after_close_is_noop() {
        let recorder = Recorder::new(None);
        let d = dispatcher(DispatcherConfig::default(), Arc::clone(&recorder));
        d.close().unwrap();
        d.close().unwrap();

        d.log(LogContext::new(), LogLevel::Error, b"late", &Fields::new());
        assert!(d.is_closed());
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert!(recorder.errors.lock().is_empty());
    }

    #[test]
    fn test_panic_recovered_per_job() {
        let recorder = Recorder::new(Some("bad"));
        let config = DispatcherConfig {
            worker_count: 1,
            queue_size: 16,
            ..DispatcherConfig::default()
        };
        let d = dispatcher(config, Arc::clone(&recorder));

        d.log(LogContext::new(), LogLevel::Info, b"before", &Fields::new());
        d.log(LogContext::new(), LogLevel::Info, b"bad", &Fields::new());
        d.log(LogContext::new(), LogLevel::Info, b"after", &Fields::new());
        d.close().unwrap();

        let seen: Vec<String> = recorder.seen.lock().iter().map(|(_, m)| m.clone()).collect();
        assert_eq!(seen, vec!["before".to_string(), "after".to_string()]);

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("processor failed on bad"));

        let report = recorder.err_mem.contents_string();
        assert!(report.contains("[LOGGER CRITICAL] Async worker 0 recovered from panic"));
    }

    #[test]
    fn test_fields_are_copied() {
        struct FieldCheck {
            handler: ErrorHandler,
            err_out: Mutex<Box<dyn Sink>>,
            got: Mutex<Option<Fields>>,
        }

        impl Processor for FieldCheck {
            fn log(&self, _ctx: &LogContext, _level: LogLevel, _message: &[u8], fields: &Fields) {
                *self.got.lock() = Some(fields.clone());
            }
            fn error_handler(&self) -> &ErrorHandler {
                &self.handler
            }
            fn err_out(&self) -> &Mutex<Box<dyn Sink>> {
                &self.err_out
            }
        }

        let processor = Arc::new(FieldCheck {
            handler: Arc::new(|_: &LoggerError| {}),
            err_out: Mutex::new(Box::new(MemorySink::new())),
            got: Mutex::new(None),
        });
        let d = AsyncDispatcher::new(
            DispatcherConfig::default(),
            processor.clone(),
            Arc::new(PoolRegistry::new()),
            Arc::new(LoggerStats::new()),
        )
        .unwrap();

        let mut fields = Fields::new();
        fields.insert("user".into(), "alice".into());
        d.log(LogContext::new(), LogLevel::Info, b"x", &fields);
        fields.clear();
        d.close().unwrap();

        let got = processor.got.lock().take().unwrap();
        assert_eq!(got.get("user"), Some(&"alice".into()));
    }
}
