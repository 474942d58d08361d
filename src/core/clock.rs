//! Coarse clock
//!
//! A background thread refreshes a cached timestamp at a fixed resolution so
//! the log path reads one atomic instead of querying the system clock.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct CoarseClock {
    micros: Arc<AtomicI64>,
    resolution: Duration,
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CoarseClock {
    /// Start a clock refreshed every `resolution`
    pub fn start(resolution: Duration) -> std::io::Result<Self> {
        let resolution = resolution.max(Duration::from_micros(100));
        let micros = Arc::new(AtomicI64::new(Utc::now().timestamp_micros()));
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(resolution);
        let shared = Arc::clone(&micros);

        let handle = thread::Builder::new()
            .name("logger-clock".to_string())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        shared.store(Utc::now().timestamp_micros(), Ordering::Relaxed);
                    }
                    recv(stop_rx) -> _ => break,
                }
            })?;

        Ok(Self {
            micros,
            resolution,
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Cached time, at most one resolution step stale while running
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::Relaxed)).unwrap_or_else(Utc::now)
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Stop the refresh thread; idempotent
    pub fn stop(&self) {
        drop(self.stop.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                eprintln!("[LOGGER ERROR] Clock thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CoarseClock {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CoarseClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoarseClock")
            .field("resolution", &self.resolution)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = CoarseClock::start(Duration::from_millis(1)).unwrap();
        let first = clock.now();
        thread::sleep(Duration::from_millis(20));
        let second = clock.now();
        assert!(second > first);

        let drift = (Utc::now() - second).num_milliseconds().abs();
        assert!(drift < 1_000, "clock drifted {}ms", drift);

        clock.stop();
        assert!(!clock.is_running());
        clock.stop();
    }

    #[test]
    fn test_stopped_clock_freezes() {
        let clock = CoarseClock::start(Duration::from_millis(1)).unwrap();
        clock.stop();
        let frozen = clock.now();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.now(), frozen);
    }
}
