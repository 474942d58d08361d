//! Pool and logger metrics for observability
//!
//! `PoolMetrics` is created once per [`PoolRegistry`](super::pool::PoolRegistry)
//! and shared by every component built on that registry. `LoggerStats` tracks
//! the outcome of log calls for one logger and its clones. Counters are only
//! ever reset by an explicit `reset()`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters for the pool tier
///
/// # Example
///
/// ```
/// use pooled_logger::PoolMetrics;
///
/// let metrics = PoolMetrics::new();
/// metrics.record_entry_created();
/// assert_eq!(metrics.snapshot().entries_created, 1);
/// ```
#[derive(Debug, Default)]
pub struct PoolMetrics {
    entries_created: AtomicU64,
    entries_reused: AtomicU64,
    entries_released: AtomicU64,
    pool_misses: AtomicU64,
    entries_serialized: AtomicU64,
    caller_gets: AtomicU64,
    caller_puts: AtomicU64,
    buffer_gets: AtomicU64,
    buffer_puts: AtomicU64,
    slice_gets: AtomicU64,
    slice_puts: AtomicU64,
    map_gets: AtomicU64,
    map_puts: AtomicU64,
    errors: AtomicU64,
    format_nanos: AtomicU64,
    write_nanos: AtomicU64,
}

/// Point-in-time copy of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub entries_created: u64,
    pub entries_reused: u64,
    pub entries_released: u64,
    pub pool_misses: u64,
    pub entries_serialized: u64,
    pub caller_gets: u64,
    pub caller_puts: u64,
    pub buffer_gets: u64,
    pub buffer_puts: u64,
    pub slice_gets: u64,
    pub slice_puts: u64,
    pub map_gets: u64,
    pub map_puts: u64,
    pub errors: u64,
    pub format_nanos: u64,
    pub write_nanos: u64,
}

impl PoolMetricsSnapshot {
    /// Share of entry gets served by a recycled object (0.0 - 1.0)
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.entries_created + self.entries_reused;
        if total == 0 {
            0.0
        } else {
            self.entries_reused as f64 / total as f64
        }
    }
}

macro_rules! recorders {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl PoolMetrics {
    pub const fn new() -> Self {
        Self {
            entries_created: AtomicU64::new(0),
            entries_reused: AtomicU64::new(0),
            entries_released: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            entries_serialized: AtomicU64::new(0),
            caller_gets: AtomicU64::new(0),
            caller_puts: AtomicU64::new(0),
            buffer_gets: AtomicU64::new(0),
            buffer_puts: AtomicU64::new(0),
            slice_gets: AtomicU64::new(0),
            slice_puts: AtomicU64::new(0),
            map_gets: AtomicU64::new(0),
            map_puts: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            format_nanos: AtomicU64::new(0),
            write_nanos: AtomicU64::new(0),
        }
    }

    recorders! {
        record_entry_created => entries_created,
        record_entry_reused => entries_reused,
        record_entry_released => entries_released,
        record_pool_miss => pool_misses,
        record_serialized => entries_serialized,
        record_caller_get => caller_gets,
        record_caller_put => caller_puts,
        record_buffer_get => buffer_gets,
        record_buffer_put => buffer_puts,
        record_slice_get => slice_gets,
        record_slice_put => slice_puts,
        record_map_get => map_gets,
        record_map_put => map_puts,
        record_error => errors,
    }

    #[inline]
    pub fn record_format_time(&self, elapsed: Duration) {
        self.format_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_time(&self, elapsed: Duration) {
        self.write_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PoolMetricsSnapshot {
            entries_created: load(&self.entries_created),
            entries_reused: load(&self.entries_reused),
            entries_released: load(&self.entries_released),
            pool_misses: load(&self.pool_misses),
            entries_serialized: load(&self.entries_serialized),
            caller_gets: load(&self.caller_gets),
            caller_puts: load(&self.caller_puts),
            buffer_gets: load(&self.buffer_gets),
            buffer_puts: load(&self.buffer_puts),
            slice_gets: load(&self.slice_gets),
            slice_puts: load(&self.slice_puts),
            map_gets: load(&self.map_gets),
            map_puts: load(&self.map_puts),
            errors: load(&self.errors),
            format_nanos: load(&self.format_nanos),
            write_nanos: load(&self.write_nanos),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.entries_created,
            &self.entries_reused,
            &self.entries_released,
            &self.pool_misses,
            &self.entries_serialized,
            &self.caller_gets,
            &self.caller_puts,
            &self.buffer_gets,
            &self.buffer_puts,
            &self.slice_gets,
            &self.slice_puts,
            &self.map_gets,
            &self.map_puts,
            &self.errors,
            &self.format_nanos,
            &self.write_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Outcome counters for one logger (shared by its clones)
#[derive(Debug, Default)]
pub struct LoggerStats {
    logged: AtomicU64,
    filtered: AtomicU64,
    sampled_out: AtomicU64,
    async_dropped: AtomicU64,
    format_errors: AtomicU64,
    write_errors: AtomicU64,
    hook_errors: AtomicU64,
    panics_recovered: AtomicU64,
    jobs_timed_out: AtomicU64,
}

/// Point-in-time copy of [`LoggerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoggerStatsSnapshot {
    pub logged: u64,
    pub filtered: u64,
    pub sampled_out: u64,
    pub async_dropped: u64,
    pub format_errors: u64,
    pub write_errors: u64,
    pub hook_errors: u64,
    pub panics_recovered: u64,
    pub jobs_timed_out: u64,
}

impl LoggerStats {
    pub const fn new() -> Self {
        Self {
            logged: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            async_dropped: AtomicU64::new(0),
            format_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            hook_errors: AtomicU64::new(0),
            panics_recovered: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
        }
    }

    recorders! {
        record_logged => logged,
        record_filtered => filtered,
        record_sampled_out => sampled_out,
        record_async_dropped => async_dropped,
        record_format_error => format_errors,
        record_write_error => write_errors,
        record_hook_error => hook_errors,
        record_panic => panics_recovered,
        record_timeout => jobs_timed_out,
    }

    #[inline]
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn async_dropped(&self) -> u64 {
        self.async_dropped.load(Ordering::Relaxed)
    }

    /// Get drop rate as a percentage (0.0 - 100.0)
    ///
    /// Returns 0.0 if nothing has been processed.
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.async_dropped() as f64;
        let total = self.logged() as f64 + dropped;
        if total == 0.0 {
            0.0
        } else {
            (dropped / total) * 100.0
        }
    }

    pub fn snapshot(&self) -> LoggerStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LoggerStatsSnapshot {
            logged: load(&self.logged),
            filtered: load(&self.filtered),
            sampled_out: load(&self.sampled_out),
            async_dropped: load(&self.async_dropped),
            format_errors: load(&self.format_errors),
            write_errors: load(&self.write_errors),
            hook_errors: load(&self.hook_errors),
            panics_recovered: load(&self.panics_recovered),
            jobs_timed_out: load(&self.jobs_timed_out),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.logged,
            &self.filtered,
            &self.sampled_out,
            &self.async_dropped,
            &self.format_errors,
            &self.write_errors,
            &self.hook_errors,
            &self.panics_recovered,
            &self.jobs_timed_out,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_metrics_new() {
        let metrics = PoolMetrics::new();
        assert_eq!(metrics.snapshot(), PoolMetricsSnapshot::default());
    }

    #[test]
    fn test_pool_metrics_reuse_ratio() {
        let metrics = PoolMetrics::new();
        assert_eq!(metrics.snapshot().reuse_ratio(), 0.0);

        metrics.record_entry_created();
        for _ in 0..3 {
            metrics.record_entry_reused();
        }
        assert_eq!(metrics.snapshot().reuse_ratio(), 0.75);
    }

    #[test]
    fn test_pool_metrics_timings_and_reset() {
        let metrics = PoolMetrics::new();
        metrics.record_format_time(Duration::from_micros(2));
        metrics.record_write_time(Duration::from_nanos(500));
        metrics.record_buffer_get();

        let snap = metrics.snapshot();
        assert_eq!(snap.format_nanos, 2_000);
        assert_eq!(snap.write_nanos, 500);
        assert_eq!(snap.buffer_gets, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), PoolMetricsSnapshot::default());
    }

    #[test]
    fn test_logger_stats_drop_rate() {
        let stats = LoggerStats::new();
        assert_eq!(stats.drop_rate(), 0.0);

        for _ in 0..90 {
            stats.record_logged();
        }
        for _ in 0..10 {
            stats.record_async_dropped();
        }

        let rate = stats.drop_rate();
        assert!((9.9..=10.1).contains(&rate), "Drop rate was {}", rate);

        stats.reset();
        assert_eq!(stats.snapshot(), LoggerStatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = LoggerStats::new();
        stats.record_hook_error();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"hook_errors\":1"));
    }
}
