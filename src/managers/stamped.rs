/*!
 * Stamped Lock Manager
 *
 * Read/write manager built directly on the [`StampedLock`] primitive. In
 * addition to the common read/write surface it offers optimistic reads and
 * an atomic write-to-read downgrade. Reader and writer activity are queried
 * from the primitive itself.
 */

use super::reader_writer::{acquire_stamp, spin_while};
use super::ReadWriteLockManager;
use crate::config::LockConfig;
use crate::diagnostics::{MonitoredLock, ReadWriteMonitoring};
use crate::errors::{LockError, LockResult};
use crate::lock::{Lock, ReleaseOnce};
use crate::sync::{AcquireLoop, LockKind, StampedLock};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

/// Shared read lock on the primitive
pub struct StampedReadLock {
    lock: Arc<StampedLock>,
    stamp: u64,
    state: ReleaseOnce,
}

impl Lock for StampedReadLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn release(&mut self) -> LockResult<()> {
        self.state.take()?;
        self.lock.unlock_read(self.stamp)
    }
}

/// Exclusive write lock on the primitive
pub struct StampedWriteLock {
    lock: Arc<StampedLock>,
    stamp: u64,
}

impl Lock for StampedWriteLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.stamp != 0
    }

    fn release(&mut self) -> LockResult<()> {
        match mem::replace(&mut self.stamp, 0) {
            0 => Err(LockError::not_locked()),
            stamp => self.lock.unlock_write(stamp),
        }
    }
}

/// Optimistic read: no lock is held, the stamp is validated on use
///
/// `is_active` reports whether no write happened since the stamp was taken.
/// Releasing is a no-op.
pub struct OptimisticReadLock {
    lock: Arc<StampedLock>,
    stamp: u64,
}

impl OptimisticReadLock {
    /// Check that no write happened since this lock was taken
    #[inline]
    pub fn validate(&self) -> bool {
        self.lock.validate(self.stamp)
    }
}

impl Lock for OptimisticReadLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.validate()
    }

    fn release(&mut self) -> LockResult<()> {
        Ok(())
    }
}

impl fmt::Debug for OptimisticReadLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticReadLock")
            .field("valid", &self.validate())
            .finish()
    }
}

/// Read/write manager with optimistic reads and downgrade
pub struct StampedLockManager {
    lock: Arc<StampedLock>,
    monitoring: ReadWriteMonitoring<StampedReadLock, StampedWriteLock>,
    bounded_wait: Duration,
}

impl StampedLockManager {
    /// Manager with plain diagnostics
    pub fn new() -> Self {
        Self::with_config(&LockConfig::default())
    }

    /// Manager configured from `config`
    pub fn with_config(config: &LockConfig) -> Self {
        Self {
            lock: Arc::new(StampedLock::new()),
            monitoring: ReadWriteMonitoring::new(config),
            bounded_wait: config.bounded_wait(),
        }
    }

    /// Diagnostics wrapped around this manager's locks
    pub fn monitoring(&self) -> &ReadWriteMonitoring<StampedReadLock, StampedWriteLock> {
        &self.monitoring
    }

    /// Take an optimistic read stamp; `None` while a writer is active
    pub fn get_optimistic_read_lock(&self) -> Option<OptimisticReadLock> {
        match self.lock.try_optimistic_read() {
            0 => None,
            stamp => Some(OptimisticReadLock {
                lock: self.lock.clone(),
                stamp,
            }),
        }
    }

    /// Atomically downgrade a held write lock to a read lock
    ///
    /// No other writer can get in between. Fails with `IllegalState` if the
    /// handle is not an active write lock of this manager.
    #[track_caller]
    pub fn convert_to_read_lock(
        &self,
        write_lock: MonitoredLock<StampedWriteLock>,
    ) -> LockResult<MonitoredLock<StampedReadLock>> {
        let owned_here = write_lock
            .inner()
            .is_some_and(|inner| Arc::ptr_eq(&inner.lock, &self.lock));
        if !owned_here {
            return Err(LockError::IllegalState(
                "Lock is not a write lock of this manager".to_string(),
            ));
        }

        let mut inner = write_lock.into_inner()?;
        let stamp = mem::replace(&mut inner.stamp, 0);
        let read_stamp = self.lock.try_convert_to_read_lock(stamp);
        if read_stamp == 0 {
            return Err(LockError::IllegalState(
                "Lock is not a locked write lock".to_string(),
            ));
        }

        Ok(self.monitoring.read.register(StampedReadLock {
            lock: self.lock.clone(),
            stamp: read_stamp,
            state: ReleaseOnce::new(),
        }))
    }

    fn read_lock_inner(&self) -> LockResult<StampedReadLock> {
        let mut wait = AcquireLoop::new(&self.monitoring);
        let stamp = acquire_stamp(
            &self.monitoring,
            &mut wait,
            LockKind::Write,
            self.bounded_wait,
            || self.lock.read_lock_interruptibly(),
            |timeout| self.lock.try_read_lock_for(timeout),
        )?;
        Ok(StampedReadLock {
            lock: self.lock.clone(),
            stamp,
            state: ReleaseOnce::new(),
        })
    }

    fn write_lock_inner(&self) -> LockResult<StampedWriteLock> {
        let mut wait = AcquireLoop::new(&self.monitoring);
        // a blocked writer waits on whichever side is currently held
        let kind = if self.lock.is_read_locked() {
            LockKind::Read
        } else {
            LockKind::Write
        };
        let stamp = acquire_stamp(
            &self.monitoring,
            &mut wait,
            kind,
            self.bounded_wait,
            || self.lock.write_lock_interruptibly(),
            |timeout| self.lock.try_write_lock_for(timeout),
        )?;
        Ok(StampedWriteLock {
            lock: self.lock.clone(),
            stamp,
        })
    }
}

impl Default for StampedLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadWriteLockManager for StampedLockManager {
    type ReadLock = MonitoredLock<StampedReadLock>;
    type WriteLock = MonitoredLock<StampedWriteLock>;

    #[track_caller]
    fn try_read_lock(&self) -> Option<Self::ReadLock> {
        self.monitoring.read.try_lock(|| match self.lock.try_read_lock() {
            0 => None,
            stamp => Some(StampedReadLock {
                lock: self.lock.clone(),
                stamp,
                state: ReleaseOnce::new(),
            }),
        })
    }

    #[track_caller]
    fn get_read_lock(&self) -> LockResult<Self::ReadLock> {
        self.monitoring.read.get_lock(|| self.read_lock_inner())
    }

    #[track_caller]
    fn try_write_lock(&self) -> Option<Self::WriteLock> {
        self.monitoring.write.try_lock(|| match self.lock.try_write_lock() {
            0 => None,
            stamp => Some(StampedWriteLock {
                lock: self.lock.clone(),
                stamp,
            }),
        })
    }

    #[track_caller]
    fn get_write_lock(&self) -> LockResult<Self::WriteLock> {
        self.monitoring.write.get_lock(|| self.write_lock_inner())
    }

    #[inline]
    fn is_reader_active(&self) -> bool {
        self.lock.is_read_locked()
    }

    #[inline]
    fn is_writer_active(&self) -> bool {
        self.lock.is_write_locked()
    }

    fn wait_for_active_readers(&self) -> LockResult<()> {
        spin_while(&self.monitoring, LockKind::Read, || self.lock.is_read_locked())
    }

    fn wait_for_active_writer(&self) -> LockResult<()> {
        spin_while(&self.monitoring, LockKind::Write, || self.lock.is_write_locked())
    }
}

impl fmt::Debug for StampedLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampedLockManager")
            .field("lock", &self.lock)
            .finish()
    }
}
