/*!
 * Read/Write Lock Managers
 *
 * Heap-handle managers over the shared reader/writer core. The preference
 * type parameter selects the default writer preference weight and whether
 * readers register before or after an active writer lets go.
 */

use super::reader_writer::ReaderWriterCore;
use super::ReadWriteLockManager;
use crate::config::LockConfig;
use crate::diagnostics::{MonitoredLock, ReadWriteMonitoring};
use crate::errors::{LockError, LockResult};
use crate::lock::{Lock, ReleaseOnce};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

/// Fairness policy of an [`AbstractReadWriteLockManager`]
pub trait Preference: Send + Sync + 'static {
    /// Default writer preference weight
    const WRITE_PREFERENCE: u32;
    /// Whether readers wait for an active writer before registering
    const DEFER_READERS: bool;
}

/// A writer gives up almost immediately while readers are active
#[derive(Debug, Clone, Copy)]
pub struct ReadPreference;

impl Preference for ReadPreference {
    const WRITE_PREFERENCE: u32 = 1;
    const DEFER_READERS: bool = false;
}

/// A writer holds the primitive through many spins; readers defer to it
#[derive(Debug, Clone, Copy)]
pub struct WritePreference;

impl Preference for WritePreference {
    const WRITE_PREFERENCE: u32 = 1000;
    const DEFER_READERS: bool = true;
}

/// Read-preferring read/write lock manager
pub type ReadPrefReadWriteLockManager = AbstractReadWriteLockManager<ReadPreference>;

/// Write-preferring read/write lock manager
pub type WritePrefReadWriteLockManager = AbstractReadWriteLockManager<WritePreference>;

/// Read handle; releasing unregisters the reader
pub struct ReadLock {
    core: Arc<ReaderWriterCore>,
    state: ReleaseOnce,
}

impl ReadLock {
    fn new(core: &Arc<ReaderWriterCore>) -> Self {
        Self {
            core: core.clone(),
            state: ReleaseOnce::new(),
        }
    }
}

impl Lock for ReadLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn release(&mut self) -> LockResult<()> {
        self.state.take()?;
        self.core.unlock_read();
        Ok(())
    }
}

/// Write handle; holds the primitive's write stamp
pub struct WriteLock {
    core: Arc<ReaderWriterCore>,
    stamp: u64,
}

impl Lock for WriteLock {
    #[inline]
    fn is_active(&self) -> bool {
        self.stamp != 0
    }

    fn release(&mut self) -> LockResult<()> {
        match mem::replace(&mut self.stamp, 0) {
            0 => Err(LockError::not_locked()),
            stamp => self.core.unlock_write(stamp),
        }
    }
}

/// Read/write lock manager parameterized by its fairness policy
pub struct AbstractReadWriteLockManager<P: Preference> {
    core: Arc<ReaderWriterCore>,
    monitoring: ReadWriteMonitoring<ReadLock, WriteLock>,
    _preference: PhantomData<fn() -> P>,
}

impl<P: Preference> AbstractReadWriteLockManager<P> {
    /// Manager with plain diagnostics
    pub fn new() -> Self {
        Self::with_config(&LockConfig::default())
    }

    /// Manager configured from `config`
    pub fn with_config(config: &LockConfig) -> Self {
        let weight = config.write_preference.unwrap_or(P::WRITE_PREFERENCE);
        Self {
            core: Arc::new(ReaderWriterCore::new(weight, config.bounded_wait())),
            monitoring: ReadWriteMonitoring::new(config),
            _preference: PhantomData,
        }
    }

    /// Effective writer preference weight
    pub fn write_preference(&self) -> u32 {
        self.core.write_preference()
    }

    /// Diagnostics wrapped around this manager's locks
    pub fn monitoring(&self) -> &ReadWriteMonitoring<ReadLock, WriteLock> {
        &self.monitoring
    }
}

impl<P: Preference> Default for AbstractReadWriteLockManager<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Preference> ReadWriteLockManager for AbstractReadWriteLockManager<P> {
    type ReadLock = MonitoredLock<ReadLock>;
    type WriteLock = MonitoredLock<WriteLock>;

    #[track_caller]
    fn try_read_lock(&self) -> Option<Self::ReadLock> {
        self.monitoring.read.try_lock(|| {
            self.core
                .try_read(P::DEFER_READERS)
                .then(|| ReadLock::new(&self.core))
        })
    }

    #[track_caller]
    fn get_read_lock(&self) -> LockResult<Self::ReadLock> {
        self.monitoring.read.get_lock(|| {
            self.core.read(&self.monitoring, P::DEFER_READERS)?;
            Ok(ReadLock::new(&self.core))
        })
    }

    #[track_caller]
    fn try_write_lock(&self) -> Option<Self::WriteLock> {
        self.monitoring.write.try_lock(|| {
            self.core.try_write().map(|stamp| WriteLock {
                core: self.core.clone(),
                stamp,
            })
        })
    }

    #[track_caller]
    fn get_write_lock(&self) -> LockResult<Self::WriteLock> {
        self.monitoring.write.get_lock(|| {
            let stamp = self.core.write(&self.monitoring)?;
            Ok(WriteLock {
                core: self.core.clone(),
                stamp,
            })
        })
    }

    #[inline]
    fn is_reader_active(&self) -> bool {
        self.core.is_reader_active()
    }

    #[inline]
    fn is_writer_active(&self) -> bool {
        self.core.is_writer_active()
    }

    fn wait_for_active_readers(&self) -> LockResult<()> {
        self.core.wait_for_readers(&self.monitoring)
    }

    fn wait_for_active_writer(&self) -> LockResult<()> {
        self.core.wait_for_writer(&self.monitoring)
    }
}

impl<P: Preference> fmt::Debug for AbstractReadWriteLockManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractReadWriteLockManager")
            .field("write_preference", &self.core.write_preference())
            .field("reader_active", &self.core.is_reader_active())
            .field("writer_active", &self.core.is_writer_active())
            .finish()
    }
}
