/*!
 * Exclusive Lock Manager
 *
 * Plain mutual exclusion: at most one outstanding lock. Blocked callers
 * wait on a condition variable in short slices so that interruption,
 * abandoned-lock cleanup and stall reports are serviced while waiting.
 */

use crate::config::LockConfig;
use crate::diagnostics::{LockMonitoring, MonitoredLock};
use crate::errors::LockResult;
use crate::lock::{Lock, ReleaseOnce};
use crate::sync::{AcquireHooks, AcquireLoop, LockKind};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Longest condvar wait between two acquisition loop steps
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Wait one slice on `condvar`, then run the acquisition loop step with the
/// mutex released
pub(super) fn block_on<T, H: AcquireHooks + ?Sized>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    wait: &mut AcquireLoop<'_, H>,
) -> LockResult<()> {
    condvar.wait_for(guard, WAIT_SLICE);
    // cleanup may release an abandoned lock of this manager, which locks
    MutexGuard::unlocked(guard, || wait.poll(LockKind::Exclusive))
}

#[derive(Debug, Default)]
struct ExclusiveState {
    active: Mutex<bool>,
    released: Condvar,
}

impl ExclusiveState {
    fn unlock(&self) {
        *self.active.lock() = false;
        self.released.notify_all();
    }
}

/// Handle for the single exclusive lock
pub struct ExclusiveLock {
    state: Arc<ExclusiveState>,
    lock: ReleaseOnce,
}

impl Lock for ExclusiveLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.lock.is_active()
    }

    fn release(&mut self) -> LockResult<()> {
        self.lock.take()?;
        self.state.unlock();
        Ok(())
    }
}

/// Non-reentrant single-owner lock manager
pub struct ExclusiveLockManager {
    state: Arc<ExclusiveState>,
    monitoring: LockMonitoring<ExclusiveLock>,
}

impl ExclusiveLockManager {
    /// Manager with plain diagnostics
    pub fn new() -> Self {
        Self::with_config(&LockConfig::default())
    }

    /// Manager configured from `config`; diagnostics use the bare alias
    pub fn with_config(config: &LockConfig) -> Self {
        Self {
            state: Arc::new(ExclusiveState::default()),
            monitoring: LockMonitoring::new(&config.alias, config),
        }
    }

    pub fn monitoring(&self) -> &LockMonitoring<ExclusiveLock> {
        &self.monitoring
    }

    fn new_lock(&self) -> ExclusiveLock {
        ExclusiveLock {
            state: self.state.clone(),
            lock: ReleaseOnce::new(),
        }
    }

    /// Take the lock if it is free
    #[track_caller]
    pub fn try_exclusive_lock(&self) -> Option<MonitoredLock<ExclusiveLock>> {
        self.monitoring.try_lock(|| {
            let mut active = self.state.active.lock();
            if *active {
                return None;
            }
            *active = true;
            Some(self.new_lock())
        })
    }

    /// Block until the lock is held; interruptible
    #[track_caller]
    pub fn get_exclusive_lock(&self) -> LockResult<MonitoredLock<ExclusiveLock>> {
        self.monitoring.get_lock(|| {
            let mut wait = AcquireLoop::new(&self.monitoring);
            let mut active = self.state.active.lock();
            while *active {
                block_on(&self.state.released, &mut active, &mut wait)?;
            }
            *active = true;
            Ok(self.new_lock())
        })
    }

    /// Check if the lock is currently held
    pub fn is_active_lock(&self) -> bool {
        *self.state.active.lock()
    }

    /// Block until the lock is free, without taking it; interruptible
    pub fn wait_for_active_locks(&self) -> LockResult<()> {
        let mut wait = AcquireLoop::new(&self.monitoring);
        let mut active = self.state.active.lock();
        while *active {
            block_on(&self.state.released, &mut active, &mut wait)?;
        }
        Ok(())
    }
}

impl Default for ExclusiveLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExclusiveLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLockManager")
            .field("active", &self.is_active_lock())
            .field("alias", &self.monitoring.alias())
            .finish()
    }
}
