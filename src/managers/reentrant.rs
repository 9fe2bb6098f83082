/*!
 * Reentrant Exclusive Lock Manager
 *
 * Single-owner lock that the owning thread may take again without
 * blocking. Ownership is a thread id plus a hold count; the lock is free
 * once every hold is released.
 *
 * A hold may be released from a thread other than the owner. This is
 * logged but allowed, since transactions can be handed off between
 * threads.
 */

use super::exclusive::block_on;
use crate::config::LockConfig;
use crate::diagnostics::{LockMonitoring, MonitoredLock};
use crate::errors::{LockError, LockResult};
use crate::lock::{Lock, ReleaseOnce};
use crate::logging::LOG_TARGET;
use crate::sync::AcquireLoop;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::warn;

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    holds: usize,
}

impl Owner {
    /// Take a hold for `me` if free or already owned by `me`
    fn try_enter(&mut self, me: ThreadId) -> bool {
        match self.thread {
            None => {
                self.thread = Some(me);
                self.holds = 1;
                true
            }
            Some(owner) if owner == me => {
                self.holds += 1;
                true
            }
            Some(_) => false,
        }
    }
}

#[derive(Debug, Default)]
struct ReentrantState {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantState {
    fn exit(&self) -> LockResult<()> {
        let mut owner = self.owner.lock();
        if owner.holds == 0 {
            return Err(LockError::not_locked());
        }

        let me = thread::current().id();
        if owner.thread != Some(me) {
            warn!(
                target: LOG_TARGET,
                owner = ?owner.thread,
                releaser = ?me,
                "Releasing lock from a thread other than its owner"
            );
        }

        owner.holds -= 1;
        if owner.holds == 0 {
            owner.thread = None;
            self.released.notify_all();
        }
        Ok(())
    }
}

/// One hold on a reentrant exclusive lock
pub struct ReentrantLock {
    state: Arc<ReentrantState>,
    lock: ReleaseOnce,
}

impl Lock for ReentrantLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.lock.is_active()
    }

    fn release(&mut self) -> LockResult<()> {
        self.lock.take()?;
        self.state.exit()
    }
}

/// Reentrant single-owner lock manager
pub struct ExclusiveReentrantLockManager {
    state: Arc<ReentrantState>,
    monitoring: LockMonitoring<ReentrantLock>,
}

impl ExclusiveReentrantLockManager {
    /// Manager with plain diagnostics
    pub fn new() -> Self {
        Self::with_config(&LockConfig::default())
    }

    /// Manager configured from `config`; diagnostics use the bare alias
    pub fn with_config(config: &LockConfig) -> Self {
        Self {
            state: Arc::new(ReentrantState::default()),
            monitoring: LockMonitoring::new(&config.alias, config),
        }
    }

    pub fn monitoring(&self) -> &LockMonitoring<ReentrantLock> {
        &self.monitoring
    }

    fn new_lock(&self) -> ReentrantLock {
        ReentrantLock {
            state: self.state.clone(),
            lock: ReleaseOnce::new(),
        }
    }

    /// Take a hold if the lock is free or owned by the calling thread
    #[track_caller]
    pub fn try_exclusive_lock(&self) -> Option<MonitoredLock<ReentrantLock>> {
        self.monitoring.try_lock(|| {
            self.state
                .owner
                .lock()
                .try_enter(thread::current().id())
                .then(|| self.new_lock())
        })
    }

    /// Block until a hold is taken; interruptible
    #[track_caller]
    pub fn get_exclusive_lock(&self) -> LockResult<MonitoredLock<ReentrantLock>> {
        self.monitoring.get_lock(|| {
            let me = thread::current().id();
            let mut wait = AcquireLoop::new(&self.monitoring);
            let mut owner = self.state.owner.lock();
            while !owner.try_enter(me) {
                block_on(&self.state.released, &mut owner, &mut wait)?;
            }
            Ok(self.new_lock())
        })
    }

    /// Check if any thread holds the lock
    pub fn is_active_lock(&self) -> bool {
        self.state.owner.lock().holds > 0
    }

    /// Number of outstanding holds
    pub fn hold_count(&self) -> usize {
        self.state.owner.lock().holds
    }
}

impl Default for ExclusiveReentrantLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExclusiveReentrantLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self.state.owner.lock();
        f.debug_struct("ExclusiveReentrantLockManager")
            .field("owner", &owner.thread)
            .field("holds", &owner.holds)
            .finish()
    }
}
