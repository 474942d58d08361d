//! Object pools for the log hot path
//!
//! Each object kind is served by a [`TieredPool`]: a bounded lock-free fast
//! tier backed by an unbounded-but-capped shared tier that absorbs overflow.
//! A [`PoolRegistry`] groups one pool per kind together with the
//! [`PoolMetrics`] they report to, and is injected into every component that
//! allocates on the log path.
//!
//! Gets never fail: when both tiers are empty a fresh object is allocated.
//! Every object leaves the pool in its reset state.

use super::log_context::Fields;
use super::log_entry::{CallerInfo, LogEntry};
use super::metrics::PoolMetrics;
use crossbeam_queue::{ArrayQueue, SegQueue};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Where a pooled value came from
enum Taken<T> {
    Fast(T),
    Shared(T),
    Empty,
}

/// Two-tier free list
pub struct TieredPool<T> {
    fast: ArrayQueue<T>,
    shared: SegQueue<T>,
    shared_limit: usize,
}

impl<T> TieredPool<T> {
    /// `fast_capacity` must be non-zero
    pub fn new(fast_capacity: usize, shared_limit: usize) -> Self {
        Self {
            fast: ArrayQueue::new(fast_capacity.max(1)),
            shared: SegQueue::new(),
            shared_limit,
        }
    }

    fn take(&self) -> Taken<T> {
        if let Some(value) = self.fast.pop() {
            return Taken::Fast(value);
        }
        match self.shared.pop() {
            Some(value) => Taken::Shared(value),
            None => Taken::Empty,
        }
    }

    /// Returns false when both tiers are full and the value was dropped
    fn give(&self, value: T) -> bool {
        match self.fast.push(value) {
            Ok(()) => true,
            Err(value) => {
                if self.shared.len() < self.shared_limit {
                    self.shared.push(value);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Number of idle objects across both tiers
    pub fn idle(&self) -> usize {
        self.fast.len() + self.shared.len()
    }
}

/// Sizing for a [`PoolRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Capacity of each fast tier
    pub fast_capacity: usize,
    /// Maximum idle objects kept in each shared tier
    pub shared_limit: usize,
    /// Initial capacity of freshly allocated byte buffers
    pub buffer_capacity: usize,
    /// Buffers that grew beyond this are released to the allocator
    pub max_buffer_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fast_capacity: 256,
            shared_limit: 4096,
            buffer_capacity: 512,
            max_buffer_capacity: 64 * 1024,
        }
    }
}

/// One pool per object kind plus the metrics they update
///
/// # Example
///
/// ```
/// use pooled_logger::PoolRegistry;
///
/// let pools = PoolRegistry::new();
/// let mut entry = pools.entry();
/// entry.message.extend_from_slice(b"hello");
/// drop(entry); // returned to the pool
///
/// let entry = pools.entry();
/// assert!(entry.is_reset());
/// ```
pub struct PoolRegistry {
    entries: TieredPool<Box<LogEntry>>,
    callers: TieredPool<Box<CallerInfo>>,
    buffers: TieredPool<Vec<u8>>,
    strings: TieredPool<Vec<String>>,
    byte_slices: TieredPool<Vec<Vec<u8>>>,
    maps: TieredPool<Fields>,
    metrics: Arc<PoolMetrics>,
    config: PoolConfig,
}

fn tiered<T>(config: &PoolConfig) -> TieredPool<T> {
    TieredPool::new(config.fast_capacity, config.shared_limit)
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_metrics(config, Arc::new(PoolMetrics::new()))
    }

    /// Build a registry reporting into existing metrics
    pub fn with_metrics(config: PoolConfig, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            entries: tiered(&config),
            callers: tiered(&config),
            buffers: tiered(&config),
            strings: tiered(&config),
            byte_slices: tiered(&config),
            maps: tiered(&config),
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // ---- entries ---------------------------------------------------------

    pub fn get_entry(&self) -> Box<LogEntry> {
        match self.entries.take() {
            Taken::Fast(mut entry) => {
                entry.reset();
                self.metrics.record_entry_reused();
                entry
            }
            Taken::Shared(mut entry) => {
                entry.reset();
                self.metrics.record_pool_miss();
                self.metrics.record_entry_reused();
                entry
            }
            Taken::Empty => {
                self.metrics.record_pool_miss();
                self.metrics.record_entry_created();
                Box::default()
            }
        }
    }

    /// Release an entry, returning its nested pooled objects first
    pub fn put_entry(&self, mut entry: Box<LogEntry>) {
        if let Some(caller) = entry.caller.take() {
            self.put_caller(caller);
        }
        if let Some(stack) = entry.stack_trace.take() {
            self.put_buffer(stack);
        }
        entry.reset();
        self.metrics.record_entry_released();
        self.entries.give(entry);
    }

    /// Scoped entry, released on drop
    pub fn entry(&self) -> PooledEntry<'_> {
        PooledEntry {
            entry: Some(self.get_entry()),
            pools: self,
        }
    }

    // ---- caller info -----------------------------------------------------

    pub fn get_caller(&self) -> Box<CallerInfo> {
        self.metrics.record_caller_get();
        match self.callers.take() {
            Taken::Fast(mut caller) | Taken::Shared(mut caller) => {
                caller.reset();
                caller
            }
            Taken::Empty => Box::default(),
        }
    }

    pub fn put_caller(&self, mut caller: Box<CallerInfo>) {
        caller.reset();
        self.metrics.record_caller_put();
        self.callers.give(caller);
    }

    // ---- byte buffers ----------------------------------------------------

    pub fn get_buffer(&self) -> Vec<u8> {
        self.metrics.record_buffer_get();
        match self.buffers.take() {
            Taken::Fast(mut buf) | Taken::Shared(mut buf) => {
                buf.clear();
                buf
            }
            Taken::Empty => Vec::with_capacity(self.config.buffer_capacity),
        }
    }

    /// Oversized buffers are dropped rather than retained
    pub fn put_buffer(&self, mut buf: Vec<u8>) {
        self.metrics.record_buffer_put();
        if buf.capacity() > self.config.max_buffer_capacity {
            return;
        }
        buf.clear();
        self.buffers.give(buf);
    }

    /// Scoped byte buffer, released on drop
    pub fn buffer(&self) -> PooledBuffer<'_> {
        PooledBuffer {
            buf: Some(self.get_buffer()),
            pools: self,
        }
    }

    // ---- string slices ---------------------------------------------------

    pub fn get_strings(&self) -> Vec<String> {
        self.metrics.record_slice_get();
        match self.strings.take() {
            Taken::Fast(mut v) | Taken::Shared(mut v) => {
                v.clear();
                v
            }
            Taken::Empty => Vec::new(),
        }
    }

    pub fn put_strings(&self, mut v: Vec<String>) {
        v.clear();
        self.metrics.record_slice_put();
        self.strings.give(v);
    }

    // ---- byte slices -----------------------------------------------------

    pub fn get_byte_slices(&self) -> Vec<Vec<u8>> {
        self.metrics.record_slice_get();
        match self.byte_slices.take() {
            Taken::Fast(mut v) | Taken::Shared(mut v) => {
                v.clear();
                v
            }
            Taken::Empty => Vec::new(),
        }
    }

    /// Inner buffers must already have been returned; leftovers are dropped
    pub fn put_byte_slices(&self, mut v: Vec<Vec<u8>>) {
        v.clear();
        self.metrics.record_slice_put();
        self.byte_slices.give(v);
    }

    // ---- field maps ------------------------------------------------------

    pub fn get_map(&self) -> Fields {
        self.metrics.record_map_get();
        match self.maps.take() {
            Taken::Fast(mut m) | Taken::Shared(mut m) => {
                m.clear();
                m
            }
            Taken::Empty => Fields::new(),
        }
    }

    /// Cleared in place so the table keeps its capacity
    pub fn put_map(&self, mut map: Fields) {
        map.clear();
        self.metrics.record_map_put();
        self.maps.give(map);
    }

    /// Idle entries currently pooled
    pub fn idle_entries(&self) -> usize {
        self.entries.idle()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("config", &self.config)
            .field("idle_entries", &self.entries.idle())
            .field("idle_buffers", &self.buffers.idle())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// RAII entry handle; returns the entry to its registry on drop
pub struct PooledEntry<'a> {
    entry: Option<Box<LogEntry>>,
    pools: &'a PoolRegistry,
}

impl Deref for PooledEntry<'_> {
    type Target = LogEntry;

    fn deref(&self) -> &LogEntry {
        self.entry.as_deref().expect("entry present until drop")
    }
}

impl DerefMut for PooledEntry<'_> {
    fn deref_mut(&mut self) -> &mut LogEntry {
        self.entry.as_deref_mut().expect("entry present until drop")
    }
}

impl Drop for PooledEntry<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pools.put_entry(entry);
        }
    }
}

/// RAII byte buffer handle; returns the buffer to its registry on drop
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pools: &'a PoolRegistry,
}

impl PooledBuffer<'_> {
    /// Detach the buffer; the caller becomes responsible for returning it
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pools.put_buffer(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_entry_get_put_get_is_reset() {
        let pools = PoolRegistry::new();

        let mut entry = pools.get_entry();
        entry.level = LogLevel::Error;
        entry.message.extend_from_slice(b"dirty");
        entry.fields.insert("k".into(), 1.into());
        entry.pid = 99;
        let mut caller = pools.get_caller();
        caller.fill("src/a.rs", 1, "a");
        entry.caller = Some(caller);
        entry.stack_trace = Some(b"frame".to_vec());
        pools.put_entry(entry);

        let entry = pools.get_entry();
        assert!(entry.is_reset());

        let snap = pools.metrics().snapshot();
        assert_eq!(snap.entries_created, 1);
        assert_eq!(snap.entries_reused, 1);
        assert_eq!(snap.caller_puts, 1);
        assert_eq!(snap.buffer_puts, 1);
    }

    #[test]
    fn test_nested_objects_are_recycled() {
        let pools = PoolRegistry::new();
        let mut entry = pools.get_entry();
        entry.caller = Some(pools.get_caller());
        pools.put_entry(entry);

        let caller = pools.get_caller();
        assert!(caller.is_empty());
    }

    #[test]
    fn test_overflow_goes_to_shared_tier() {
        let config = PoolConfig {
            fast_capacity: 2,
            shared_limit: 2,
            ..PoolConfig::default()
        };
        let pools = PoolRegistry::with_config(config);

        let entries: Vec<_> = (0..6).map(|_| pools.get_entry()).collect();
        for entry in entries {
            pools.put_entry(entry);
        }
        // two in the fast tier, two in the shared tier, two dropped
        assert_eq!(pools.idle_entries(), 4);

        pools.metrics().reset();
        for _ in 0..4 {
            let _ = pools.get_entry();
        }
        let snap = pools.metrics().snapshot();
        assert_eq!(snap.entries_reused, 4);
        assert_eq!(snap.pool_misses, 2);
        assert_eq!(snap.entries_created, 0);
    }

    #[test]
    fn test_every_pool_kind_sized_from_config() {
        let pools = PoolRegistry::with_config(PoolConfig {
            fast_capacity: 1,
            shared_limit: 1,
            ..PoolConfig::default()
        });

        for _ in 0..3 {
            pools.put_entry(Box::default());
            pools.put_caller(Box::default());
            pools.put_buffer(Vec::new());
            pools.put_strings(Vec::new());
            pools.put_byte_slices(Vec::new());
            pools.put_map(Fields::new());
        }

        assert_eq!(pools.entries.idle(), 2);
        assert_eq!(pools.callers.idle(), 2);
        assert_eq!(pools.buffers.idle(), 2);
        assert_eq!(pools.strings.idle(), 2);
        assert_eq!(pools.byte_slices.idle(), 2);
        assert_eq!(pools.maps.idle(), 2);
    }

    #[test]
    fn test_buffer_capacity_retained_and_capped() {
        let config = PoolConfig {
            max_buffer_capacity: 2048,
            ..PoolConfig::default()
        };
        let pools = PoolRegistry::with_config(config);

        let mut buf = pools.get_buffer();
        buf.extend_from_slice(&[1u8; 600]);
        let cap = buf.capacity();
        pools.put_buffer(buf);

        let buf = pools.get_buffer();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
        drop(buf);

        let huge = vec![0u8; 4096];
        pools.put_buffer(huge);
        let next = pools.get_buffer();
        assert!(next.capacity() < 4096);
    }

    #[test]
    fn test_map_cleared_with_capacity() {
        let pools = PoolRegistry::new();
        let mut map = pools.get_map();
        for i in 0..32 {
            map.insert(format!("k{}", i), i.into());
        }
        let cap = map.capacity();
        pools.put_map(map);

        let map = pools.get_map();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), cap);
    }

    #[test]
    fn test_slice_pools() {
        let pools = PoolRegistry::new();
        let mut strings = pools.get_strings();
        strings.push("a".into());
        pools.put_strings(strings);
        assert!(pools.get_strings().is_empty());

        let mut slices = pools.get_byte_slices();
        slices.push(vec![1]);
        pools.put_byte_slices(slices);
        assert!(pools.get_byte_slices().is_empty());

        let snap = pools.metrics().snapshot();
        assert_eq!(snap.slice_gets, 4);
        assert_eq!(snap.slice_puts, 2);
    }

    #[test]
    fn test_guards_release_on_drop() {
        let pools = PoolRegistry::new();
        {
            let mut entry = pools.entry();
            entry.message.extend_from_slice(b"scoped");
            let mut buf = pools.buffer();
            buf.extend_from_slice(b"scoped");
        }
        let snap = pools.metrics().snapshot();
        assert_eq!(snap.entries_released, 1);
        assert_eq!(snap.buffer_puts, 1);
        assert_eq!(pools.idle_entries(), 1);
    }

    #[test]
    fn test_concurrent_gets_never_share_objects() {
        let pools = Arc::new(PoolRegistry::new());
        let checked = Arc::new(Mutex::new(0usize));

        let handles: Vec<_> = (0..8u32)
            .map(|worker| {
                let pools = Arc::clone(&pools);
                let checked = Arc::clone(&checked);
                thread::spawn(move || {
                    for round in 0..200u32 {
                        let mut held: Vec<_> = (0..4).map(|_| pools.get_entry()).collect();
                        let addrs: HashSet<usize> =
                            held.iter().map(|e| &**e as *const LogEntry as usize).collect();
                        assert_eq!(addrs.len(), held.len());

                        for (i, entry) in held.iter_mut().enumerate() {
                            assert!(entry.is_reset());
                            entry.pid = worker * 1_000_000 + round * 10 + i as u32 + 1;
                        }
                        thread::yield_now();
                        for (i, entry) in held.iter().enumerate() {
                            assert_eq!(entry.pid, worker * 1_000_000 + round * 10 + i as u32 + 1);
                        }

                        for e in held {
                            pools.put_entry(e);
                        }
                        *checked.lock().unwrap() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*checked.lock().unwrap(), 8 * 200);
    }
}
