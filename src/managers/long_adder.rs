/*!
 * Long-Adder Lock Manager
 *
 * Allocation-free sibling of the read/write managers for hot paths. It runs
 * the same reader/writer protocol but returns raw `u64` stamps instead of
 * handles, so there is nothing to monitor: no leak cleanup, no tracking.
 *
 * Readers are fungible, so every read returns [`READ_LOCK_STAMP`].
 */

use super::reader_writer::ReaderWriterCore;
use crate::config::LockConfig;
use crate::errors::{LockError, LockResult};
use std::fmt;

/// Stamp returned by every successful read acquisition
///
/// Write stamps always carry the primitive's write bit, so this value can
/// never collide with one.
pub const READ_LOCK_STAMP: u64 = 1;

/// Default writer preference weight
const DEFAULT_WRITE_PREFERENCE: u32 = 1000;

/// Read/write lock manager returning raw stamps
pub struct StampedLongAdderLockManager {
    core: ReaderWriterCore,
}

impl StampedLongAdderLockManager {
    pub fn new() -> Self {
        Self::with_config(&LockConfig::default())
    }

    /// Manager configured from `config`; only the tuning fields apply
    pub fn with_config(config: &LockConfig) -> Self {
        let weight = config.write_preference.unwrap_or(DEFAULT_WRITE_PREFERENCE);
        Self {
            core: ReaderWriterCore::new(weight, config.bounded_wait()),
        }
    }

    pub fn write_preference(&self) -> u32 {
        self.core.write_preference()
    }

    /// Block until a read lock is held; interruptible
    pub fn read_lock(&self) -> LockResult<u64> {
        self.core.read(&(), false)?;
        Ok(READ_LOCK_STAMP)
    }

    /// Take a read lock if immediately available; 0 otherwise
    pub fn try_read_lock(&self) -> u64 {
        if self.core.try_read(false) {
            READ_LOCK_STAMP
        } else {
            0
        }
    }

    pub fn unlock_read(&self, stamp: u64) -> LockResult<()> {
        if stamp != READ_LOCK_STAMP {
            return Err(LockError::IllegalState(format!(
                "Invalid read stamp {}",
                stamp
            )));
        }
        if !self.core.try_unlock_read() {
            return Err(LockError::IllegalState(
                "No read lock is held".to_string(),
            ));
        }
        Ok(())
    }

    /// Block until the write lock is held; interruptible
    pub fn write_lock(&self) -> LockResult<u64> {
        self.core.write(&())
    }

    /// Take the write lock if immediately available; 0 otherwise
    pub fn try_write_lock(&self) -> u64 {
        self.core.try_write().unwrap_or(0)
    }

    pub fn unlock_write(&self, stamp: u64) -> LockResult<()> {
        self.core.unlock_write(stamp)
    }

    pub fn is_reader_active(&self) -> bool {
        self.core.is_reader_active()
    }

    pub fn is_writer_active(&self) -> bool {
        self.core.is_writer_active()
    }

    pub fn wait_for_active_readers(&self) -> LockResult<()> {
        self.core.wait_for_readers(&())
    }

    pub fn wait_for_active_writer(&self) -> LockResult<()> {
        self.core.wait_for_writer(&())
    }
}

impl Default for StampedLongAdderLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StampedLongAdderLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampedLongAdderLockManager")
            .field("core", &self.core)
            .finish()
    }
}
