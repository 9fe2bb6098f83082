/*!
 * Lock Monitoring
 *
 * Diagnostics strategies wrapped around every lock a manager hands out.
 *
 * ## Strategies
 *
 * - **Plain**: passthrough; a dropped handle releases its lock
 * - **Leak cleanup**: a handle dropped while active is queued and
 *   force-released (with a warning) at the next acquisition
 * - **Tracking**: leak cleanup plus an active-lock registry used to report
 *   stalled and possibly deadlocked waits
 *
 * ## Example
 *
 * ```ignore
 * let monitoring = LockMonitoring::new("store_WRITE", &config);
 * let lock = monitoring.get_lock(|| acquire_inner())?;
 * // ...
 * lock.release()?;
 * ```
 */

mod cleaner;
mod context;
mod tracking;

pub use context::{AcquisitionContext, LockRecord};
pub use tracking::{Tracker, WaitGraph};

use crate::config::{LockConfig, LockDiagnostics};
use crate::errors::{LockError, LockResult};
use crate::lock::Lock;
use crate::logging::LOG_TARGET;
use crate::sync::{AcquireHooks, LockKind, WaitState};
use cleaner::LockCleaner;
use smartstring::alias::String as SmartString;
use std::panic::Location;
use std::sync::Arc;
use std::thread;
use tracing::error;

struct MonitorShared<L: Lock> {
    alias: SmartString,
    flags: LockDiagnostics,
    cleaner: LockCleaner<L>,
    tracker: Option<Arc<Tracker>>,
}

impl<L: Lock> MonitorShared<L> {
    fn abandon(&self, lock: L, record: Arc<LockRecord>) {
        self.cleaner.abandon(lock, record);
    }

    fn untrack(&self, record: &LockRecord) {
        if let Some(tracker) = &self.tracker {
            tracker.untrack(record.id);
        }
    }
}

/// Diagnostics strategy for one kind of lock of one manager
pub struct LockMonitoring<L: Lock> {
    shared: Option<Arc<MonitorShared<L>>>,
}

impl<L: Lock> LockMonitoring<L> {
    /// Passthrough monitoring with no overhead
    pub fn plain() -> Self {
        Self { shared: None }
    }

    /// Build the strategy selected by `config` under the given alias
    pub fn new(alias: &str, config: &LockConfig) -> Self {
        let flags = config.resolved_diagnostics();
        if !flags.any() {
            return Self::plain();
        }

        let alias = SmartString::from(alias);
        let tracker = flags.tracking().then(|| {
            Arc::new(Tracker::new(
                alias.clone(),
                config.poll_interval,
                config.wait_graph().clone(),
            ))
        });

        Self {
            shared: Some(Arc::new(MonitorShared {
                alias,
                flags,
                cleaner: LockCleaner::new(),
                tracker,
            })),
        }
    }

    /// Alias used in diagnostic messages
    pub fn alias(&self) -> &str {
        self.shared.as_ref().map_or("", |s| s.alias.as_str())
    }

    /// Whether blocking waits must poll so cleanup can run
    #[inline]
    pub fn requires_manual_cleanup(&self) -> bool {
        self.shared.is_some()
    }

    /// Active-lock registry, present in tracking mode
    pub fn tracker(&self) -> Option<&Arc<Tracker>> {
        self.shared.as_ref().and_then(|s| s.tracker.as_ref())
    }

    /// Force-release abandoned locks; returns how many were released
    #[inline]
    pub fn run_cleanup(&self) -> usize {
        match &self.shared {
            Some(shared) if shared.cleaner.has_abandoned() => shared.cleaner.drain(
                &shared.alias,
                shared.flags.stack_trace,
                shared.tracker.as_deref(),
            ),
            _ => 0,
        }
    }

    /// Wrap a freshly acquired lock
    #[track_caller]
    pub fn register(&self, lock: L) -> MonitoredLock<L> {
        let location = Location::caller();
        let Some(shared) = &self.shared else {
            return MonitoredLock {
                inner: Some(lock),
                record: None,
                shared: None,
            };
        };

        let record = Arc::new(LockRecord::new(
            &shared.alias,
            AcquisitionContext::capture(location, shared.flags.stack_trace),
        ));
        if let Some(tracker) = &shared.tracker {
            tracker.track(&record);
        }

        MonitoredLock {
            inner: Some(lock),
            record: Some(record),
            shared: Some(shared.clone()),
        }
    }

    /// Blocking acquisition through `acquire`
    #[track_caller]
    pub fn get_lock<F>(&self, acquire: F) -> LockResult<MonitoredLock<L>>
    where
        F: FnOnce() -> LockResult<L>,
    {
        self.run_cleanup();
        let lock = acquire()?;
        Ok(self.register(lock))
    }

    /// Non-blocking acquisition through `try_acquire`
    #[track_caller]
    #[allow(clippy::manual_map)]
    pub fn try_lock<F>(&self, try_acquire: F) -> Option<MonitoredLock<L>>
    where
        F: FnOnce() -> Option<L>,
    {
        self.run_cleanup();
        // not `Option::map`: a closure would hide the caller's location
        match try_acquire() {
            Some(lock) => Some(self.register(lock)),
            None => None,
        }
    }

    fn waiting(&self, state: &mut WaitState) {
        if let Some(tracker) = self.tracker() {
            tracker.waiting(state);
        }
    }

    fn done_waiting(&self, state: &mut WaitState) {
        if let Some(tracker) = self.tracker() {
            tracker.done_waiting(state);
        }
    }
}

impl<L: Lock> AcquireHooks for LockMonitoring<L> {
    #[inline]
    fn requires_manual_cleanup(&self) -> bool {
        LockMonitoring::requires_manual_cleanup(self)
    }

    #[inline]
    fn run_cleanup(&self) {
        LockMonitoring::run_cleanup(self);
    }

    #[inline]
    fn waiting(&self, _on: LockKind, state: &mut WaitState) {
        LockMonitoring::waiting(self, state);
    }

    fn done_waiting(&self, state: &mut WaitState) {
        LockMonitoring::done_waiting(self, state);
    }
}

/// Paired monitoring for the read and write side of a manager
pub struct ReadWriteMonitoring<R: Lock, W: Lock> {
    pub read: LockMonitoring<R>,
    pub write: LockMonitoring<W>,
}

impl<R: Lock, W: Lock> ReadWriteMonitoring<R, W> {
    /// Aliases are `<alias>_READ` and `<alias>_WRITE`
    pub fn new(config: &LockConfig) -> Self {
        Self {
            read: LockMonitoring::new(&format!("{}_READ", config.alias), config),
            write: LockMonitoring::new(&format!("{}_WRITE", config.alias), config),
        }
    }

    pub fn run_cleanup(&self) -> usize {
        self.write.run_cleanup() + self.read.run_cleanup()
    }
}

impl<R: Lock, W: Lock> AcquireHooks for ReadWriteMonitoring<R, W> {
    #[inline]
    fn requires_manual_cleanup(&self) -> bool {
        self.read.requires_manual_cleanup() || self.write.requires_manual_cleanup()
    }

    #[inline]
    fn run_cleanup(&self) {
        ReadWriteMonitoring::run_cleanup(self);
    }

    #[inline]
    fn waiting(&self, on: LockKind, state: &mut WaitState) {
        match on {
            LockKind::Read => self.read.waiting(state),
            LockKind::Write | LockKind::Exclusive => self.write.waiting(state),
        }
    }

    fn done_waiting(&self, state: &mut WaitState) {
        // both sides share one wait graph; either unregisters the thread
        if self.write.tracker().is_some() {
            self.write.done_waiting(state);
        } else {
            self.read.done_waiting(state);
        }
    }
}

/// A lock handle wrapped by its monitoring strategy
///
/// Dropping an active handle releases the lock (plain mode, or while the
/// thread is panicking) or hands it to leak cleanup.
pub struct MonitoredLock<L: Lock> {
    inner: Option<L>,
    record: Option<Arc<LockRecord>>,
    shared: Option<Arc<MonitorShared<L>>>,
}

impl<L: Lock> MonitoredLock<L> {
    /// Acquisition record, present when diagnostics are enabled
    pub fn record(&self) -> Option<&LockRecord> {
        self.record.as_deref()
    }

    /// Borrow the underlying lock
    pub(crate) fn inner(&self) -> Option<&L> {
        self.inner.as_ref()
    }

    /// Take the underlying active lock out of monitoring
    pub(crate) fn into_inner(mut self) -> LockResult<L> {
        let inner = match self.inner.take() {
            Some(inner) if inner.is_active() => inner,
            _ => return Err(LockError::not_locked()),
        };
        if let (Some(shared), Some(record)) = (&self.shared, &self.record) {
            shared.untrack(record);
        }
        Ok(inner)
    }
}

impl<L: Lock> Lock for MonitoredLock<L> {
    #[inline]
    fn is_active(&self) -> bool {
        self.inner.as_ref().is_some_and(|l| l.is_active())
    }

    fn release(&mut self) -> LockResult<()> {
        let inner = self.inner.as_mut().ok_or_else(LockError::not_locked)?;
        inner.release()?;
        if let (Some(shared), Some(record)) = (&self.shared, &self.record) {
            shared.untrack(record);
        }
        Ok(())
    }
}

impl<L: Lock> Drop for MonitoredLock<L> {
    fn drop(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        if !inner.is_active() {
            return;
        }

        match (&self.shared, self.record.take()) {
            (Some(shared), Some(record)) if !thread::panicking() => {
                shared.abandon(inner, record);
            }
            (shared, record) => {
                if let (Some(shared), Some(record)) = (shared, record) {
                    shared.untrack(&record);
                }
                if let Err(e) = inner.release() {
                    error!(target: LOG_TARGET, error = %e, "Failed to release lock on drop");
                }
            }
        }
    }
}

impl<L: Lock> std::fmt::Debug for MonitoredLock<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredLock")
            .field("active", &self.is_active())
            .field("record", &self.record.as_ref().map(|r| r.id))
            .finish()
    }
}
