//! Log sampling for high-volume scenarios
//!
//! A [`LogSampler`] with rate `R > 1` lets exactly one call through for every
//! `R` consecutive calls: a shared counter is incremented per call and the call
//! proceeds iff `counter % R == 0`. Rates of 0 or 1 disable sampling.
//!
//! Sampling is deterministic so that log volume shrinks by a predictable
//! factor rather than a statistical one.
//!
//! # Example
//!
//! ```
//! use pooled_logger::LogSampler;
//!
//! let sampler = LogSampler::new(3);
//! let passed = (0..9).filter(|_| sampler.should_sample()).count();
//! assert_eq!(passed, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for sampling observability
#[derive(Debug)]
pub struct SamplerMetrics {
    /// Number of calls that passed sampling
    sampled_count: AtomicU64,

    /// Number of calls dropped by sampling
    dropped_count: AtomicU64,
}

impl SamplerMetrics {
    /// Create new metrics with all counters at zero
    pub const fn new() -> Self {
        Self {
            sampled_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn sampled_count(&self) -> u64 {
        self.sampled_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_count(&self) -> u64 {
        self.sampled_count() + self.dropped_count()
    }

    #[inline]
    pub(crate) fn record_sampled(&self) {
        self.sampled_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Observed pass ratio; 1.0 before any call
    pub fn effective_sample_rate(&self) -> f64 {
        let total = self.total_count() as f64;
        if total == 0.0 {
            1.0
        } else {
            self.sampled_count() as f64 / total
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.sampled_count.store(0, Ordering::Relaxed);
        self.dropped_count.store(0, Ordering::Relaxed);
    }
}

impl Default for SamplerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Every-Nth-call rate gate
///
/// # Thread Safety
///
/// A single atomic counter is shared by all callers; across any `rate`
/// consecutive calls, regardless of which threads make them, exactly one
/// passes.
pub struct LogSampler {
    rate: u64,
    counter: AtomicU64,
    metrics: SamplerMetrics,
}

impl LogSampler {
    /// Create a sampler letting one in `rate` calls through
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            counter: AtomicU64::new(0),
            metrics: SamplerMetrics::new(),
        }
    }

    /// Decide whether the current call proceeds
    #[inline]
    pub fn should_sample(&self) -> bool {
        if self.rate <= 1 {
            self.metrics.record_sampled();
            return true;
        }

        // fetch_add returns the previous value, so the first call observes 0
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let pass = n % self.rate == 0;
        if pass {
            self.metrics.record_sampled();
        } else {
            self.metrics.record_dropped();
        }
        pass
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn is_enabled(&self) -> bool {
        self.rate > 1
    }

    pub fn metrics(&self) -> &SamplerMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for LogSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSampler")
            .field("rate", &self.rate)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rate_zero_and_one_always_pass() {
        for rate in [0, 1] {
            let sampler = LogSampler::new(rate);
            assert!(!sampler.is_enabled());
            assert!((0..100).all(|_| sampler.should_sample()));
        }
    }

    #[test]
    fn test_first_call_passes() {
        let sampler = LogSampler::new(5);
        let decisions: Vec<bool> = (0..10).map(|_| sampler.should_sample()).collect();
        assert_eq!(
            decisions,
            vec![true, false, false, false, false, true, false, false, false, false]
        );
    }

    #[test]
    fn test_metrics_tracking() {
        let sampler = LogSampler::new(4);
        for _ in 0..100 {
            sampler.should_sample();
        }

        let metrics = sampler.metrics();
        assert_eq!(metrics.total_count(), 100);
        assert_eq!(metrics.sampled_count(), 25);
        assert_eq!(metrics.effective_sample_rate(), 0.25);

        metrics.reset();
        assert_eq!(metrics.effective_sample_rate(), 1.0);
    }

    #[test]
    fn test_concurrent_callers_share_one_counter() {
        let sampler = Arc::new(LogSampler::new(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sampler = Arc::clone(&sampler);
                thread::spawn(move || (0..250).filter(|_| sampler.should_sample()).count())
            })
            .collect();

        let passed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(passed, 100);
    }

    #[test]
    fn test_sampler_debug() {
        let sampler = LogSampler::new(2);
        let debug_str = format!("{:?}", sampler);
        assert!(debug_str.contains("LogSampler"));
        assert!(debug_str.contains("rate"));
    }
}
