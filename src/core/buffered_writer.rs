//! Batching writer
//!
//! [`BufferedWriter`] accepts rendered payloads from any thread and hands them
//! to a single flush thread that owns the sink. Queued payloads are grouped
//! into batches and each batch reaches the sink as one `write_all`. A batch is
//! flushed when it reaches `batch_size`, when its idle timer (armed on the
//! batch's first payload) fires, or on the periodic ticker.
//!
//! Lifecycle is `Open -> Closing -> Closed`. Writes never block: when the
//! queue is full the payload is counted as dropped and the write still
//! succeeds.

use super::error::{ErrorHandler, LoggerError, Result};
use super::pool::PoolRegistry;
use super::sink::Sink;
use crossbeam_channel::{after, bounded, never, select, tick, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Upper bound on how long [`BufferedWriter::flush`] waits for the flush thread
pub const FLUSH_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedWriterConfig {
    /// Capacity of the payload queue
    pub queue_size: usize,
    /// Payloads per batch before an immediate flush
    pub batch_size: usize,
    /// Periodic flush; zero disables the ticker
    pub flush_interval: Duration,
    /// Idle time after a batch's first payload; zero disables the timer
    pub batch_timeout: Duration,
}

impl Default for BufferedWriterConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            batch_size: 64,
            flush_interval: Duration::from_secs(1),
            batch_timeout: Duration::from_millis(100),
        }
    }
}

impl BufferedWriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(LoggerError::config(
                "BufferedWriter",
                "queue_size must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(LoggerError::config(
                "BufferedWriter",
                "batch_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

enum Message {
    Data(Vec<u8>),
    Flush(Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
    bytes: AtomicU64,
    write_errors: AtomicU64,
}

/// Point-in-time writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WriterStats {
    pub accepted: u64,
    pub dropped: u64,
    pub batches: u64,
    pub bytes: u64,
    pub write_errors: u64,
}

pub struct BufferedWriter {
    sender: RwLock<Option<Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
    state: AtomicU8,
    counters: Arc<Counters>,
    pools: Arc<PoolRegistry>,
    config: BufferedWriterConfig,
}

impl BufferedWriter {
    /// Start the flush thread; the writer owns `sink` from here on
    pub fn new(
        sink: Box<dyn Sink>,
        config: BufferedWriterConfig,
        pools: Arc<PoolRegistry>,
        on_error: ErrorHandler,
    ) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = bounded(config.queue_size);
        let counters = Arc::new(Counters::default());
        let flusher = Flusher {
            sink,
            receiver,
            pools: Arc::clone(&pools),
            counters: Arc::clone(&counters),
            on_error,
            config,
        };

        let handle = thread::Builder::new()
            .name("logger-flush".to_string())
            .spawn(move || flusher.run())
            .map_err(|e| LoggerError::io_operation("spawning flush thread", "buffered writer", e))?;

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            state: AtomicU8::new(OPEN),
            counters,
            pools,
            config,
        })
    }

    /// Queue a copy of `data` without blocking
    ///
    /// Returns `Err(WriterClosed)` once closing has begun. A full queue drops
    /// the payload, counts it, and still returns `Ok`.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.state.load(Ordering::Acquire) != OPEN {
            return Err(LoggerError::WriterClosed);
        }
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(LoggerError::WriterClosed);
        };

        let mut buf = self.pools.get_buffer();
        buf.extend_from_slice(data);

        match sender.try_send(Message::Data(buf)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(Message::Data(buf))) => {
                self.pools.put_buffer(buf);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(LoggerError::WriterClosed),
        }
    }

    /// Wait until every payload queued before this call has reached the sink
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        {
            let guard = self.sender.read();
            let Some(sender) = guard.as_ref() else {
                return Err(LoggerError::WriterClosed);
            };
            sender
                .send_timeout(Message::Flush(ack_tx), FLUSH_WAIT)
                .map_err(|_| LoggerError::other("buffered writer flush request timed out"))?;
        }
        ack_rx
            .recv_timeout(FLUSH_WAIT)
            .map_err(|_| LoggerError::other("buffered writer flush did not complete"))
    }

    /// Payloads dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> WriterStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WriterStats {
            accepted: load(&self.counters.accepted),
            dropped: load(&self.counters.dropped),
            batches: load(&self.counters.batches),
            bytes: load(&self.counters.bytes),
            write_errors: load(&self.counters.write_errors),
        }
    }

    pub fn config(&self) -> &BufferedWriterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Stop intake, flush everything queued, close the sink and join the
    /// flush thread; idempotent
    pub fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        drop(self.sender.write().take());

        let result = match self.handle.lock().take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(LoggerError::panic("flush thread", payload.as_ref())),
            },
            None => Ok(()),
        };

        self.state.store(CLOSED, Ordering::Release);
        result
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            eprintln!("[LOGGER ERROR] Buffered writer shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for BufferedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("config", &self.config)
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}

/// State owned by the flush thread
struct Flusher {
    sink: Box<dyn Sink>,
    receiver: Receiver<Message>,
    pools: Arc<PoolRegistry>,
    counters: Arc<Counters>,
    on_error: ErrorHandler,
    config: BufferedWriterConfig,
}

impl Flusher {
    fn run(mut self) -> Result<()> {
        let ticker = if self.config.flush_interval.is_zero() {
            never()
        } else {
            tick(self.config.flush_interval)
        };
        let mut idle: Receiver<Instant> = never();
        let mut batch = self.pools.get_byte_slices();

        loop {
            select! {
                recv(self.receiver) -> msg => match msg {
                    Ok(Message::Data(buf)) => {
                        if batch.is_empty() && !self.config.batch_timeout.is_zero() {
                            idle = after(self.config.batch_timeout);
                        }
                        batch.push(buf);
                        if batch.len() >= self.config.batch_size {
                            self.flush_batch(&mut batch);
                            idle = never();
                        }
                    }
                    Ok(Message::Flush(ack)) => {
                        self.flush_batch(&mut batch);
                        idle = never();
                        let _ = ack.send(());
                    }
                    // Disconnected and empty: everything queued has been seen
                    Err(_) => break,
                },
                recv(ticker) -> _ => {
                    if !batch.is_empty() {
                        self.flush_batch(&mut batch);
                        idle = never();
                    }
                }
                recv(idle) -> _ => {
                    self.flush_batch(&mut batch);
                    idle = never();
                }
            }
        }

        self.flush_batch(&mut batch);
        self.pools.put_byte_slices(batch);

        if self.sink.is_standard_stream() {
            self.sink
                .flush()
                .map_err(|e| LoggerError::io_operation("flushing sink", self.sink.name().to_string(), e))
        } else {
            self.sink
                .close()
                .map_err(|e| LoggerError::io_operation("closing sink", self.sink.name().to_string(), e))
        }
    }

    /// One physical write per batch; buffers go back to the pool
    fn flush_batch(&mut self, batch: &mut Vec<Vec<u8>>) {
        if batch.is_empty() {
            return;
        }

        let mut out = self.pools.get_buffer();
        for buf in batch.drain(..) {
            out.extend_from_slice(&buf);
            self.pools.put_buffer(buf);
        }

        let written = self
            .sink
            .write_all(&out)
            .and_then(|()| self.sink.flush());
        match written {
            Ok(()) => {
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes
                    .fetch_add(out.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                (self.on_error)(&LoggerError::io_operation(
                    "writing batch",
                    self.sink.name().to_string(),
                    e,
                ));
            }
        }

        self.pools.put_buffer(out);
    }
}
