//! Per-entry side-effect hooks
//!
//! Hooks fire after the entry has been written, with the fully populated
//! entry. A failing or panicking hook is reported through the error handler
//! and never stops the remaining hooks.

use super::error::{ErrorHandler, LoggerError, Result};
use super::log_context::LogContext;
use super::log_entry::LogEntry;
use super::metrics::LoggerStats;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub trait Hook: Send + Sync {
    fn fire(&self, entry: &LogEntry) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Hook backed by a closure
///
/// # Example
///
/// ```
/// use pooled_logger::{FnHook, Hook, LogEntry};
///
/// let hook = FnHook::new("noop", |_entry: &LogEntry| Ok(()));
/// assert_eq!(hook.name(), "noop");
/// ```
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&LogEntry) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&LogEntry) -> Result<()> + Send + Sync,
{
    fn fire(&self, entry: &LogEntry) -> Result<()> {
        (self.f)(entry)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Hook list, read-mostly
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: Arc<dyn Hook>) {
        self.hooks.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Fire every hook under the read lock
    ///
    /// The deadline carried by `ctx` is checked before each hook; once it has
    /// passed, the remaining hooks are skipped and one timeout is reported.
    pub(crate) fn fire_all(
        &self,
        entry: &LogEntry,
        ctx: &LogContext,
        on_error: &ErrorHandler,
        stats: &LoggerStats,
    ) {
        let hooks = self.hooks.read();
        for (fired, hook) in hooks.iter().enumerate() {
            if ctx.is_expired() {
                stats.record_timeout();
                on_error(&LoggerError::JobTimeout {
                    timeout_ms: ctx.timeout().map_or(0, |t| t.as_millis() as u64),
                    skipped_hooks: hooks.len() - fired,
                });
                return;
            }
            let result = catch_unwind(AssertUnwindSafe(|| hook.fire(entry)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.record_hook_error();
                    on_error(&LoggerError::hook(hook.name(), e.to_string()));
                }
                Err(payload) => {
                    stats.record_hook_error();
                    stats.record_panic();
                    on_error(&LoggerError::panic(
                        format!("hook '{}'", hook.name()),
                        payload.as_ref(),
                    ));
                }
            }
        }
    }

    /// Close every hook, collecting failures
    pub(crate) fn close_all(&self) -> Vec<LoggerError> {
        let hooks = self.hooks.read();
        let mut errors = Vec::new();
        for hook in hooks.iter() {
            match catch_unwind(AssertUnwindSafe(|| hook.close())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(LoggerError::hook(hook.name(), e.to_string())),
                Err(payload) => errors.push(LoggerError::panic(
                    format!("hook '{}' close", hook.name()),
                    payload.as_ref(),
                )),
            }
        }
        errors
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read();
        let names: Vec<&str> = hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}
