/*!
 * Lock Managers
 *
 * Read/write and exclusive lock managers. Every manager is configured once
 * from a [`LockConfig`](crate::config::LockConfig) and hands out
 * single-use lock handles wrapped by its diagnostics strategy.
 *
 * ## Managers
 *
 * - [`ReadPrefReadWriteLockManager`]: readers are never held back by a
 *   waiting writer
 * - [`WritePrefReadWriteLockManager`]: new readers wait while a writer holds
 *   the exclusive primitive
 * - [`StampedLockManager`]: optimistic reads and write-to-read downgrade,
 *   plus the [`Cache`] helper built on them
 * - [`StampedLongAdderLockManager`]: allocation-free, raw stamps
 * - [`ExclusiveLockManager`] and [`ExclusiveReentrantLockManager`]
 */

mod cache;
mod exclusive;
mod long_adder;
mod reader_writer;
mod readwrite;
mod reentrant;
mod stamped;

pub use cache::{Cache, OptimisticState, ReadableState, WritableState};
pub use exclusive::{ExclusiveLock, ExclusiveLockManager};
pub use long_adder::{StampedLongAdderLockManager, READ_LOCK_STAMP};
pub use readwrite::{
    AbstractReadWriteLockManager, Preference, ReadLock, ReadPrefReadWriteLockManager,
    ReadPreference, WriteLock, WritePrefReadWriteLockManager, WritePreference,
};
pub use reentrant::{ExclusiveReentrantLockManager, ReentrantLock};
pub use stamped::{OptimisticReadLock, StampedLockManager, StampedReadLock, StampedWriteLock};

use crate::errors::LockResult;
use crate::lock::Lock;

/// Common surface of the read/write lock managers
pub trait ReadWriteLockManager: Send + Sync {
    /// Handle returned by read acquisitions
    type ReadLock: Lock + 'static;
    /// Handle returned by write acquisitions
    type WriteLock: Lock + 'static;

    /// Take a read lock if one is immediately available
    fn try_read_lock(&self) -> Option<Self::ReadLock>;

    /// Block until a read lock is held; interruptible
    fn get_read_lock(&self) -> LockResult<Self::ReadLock>;

    /// Take the write lock if it is immediately available
    fn try_write_lock(&self) -> Option<Self::WriteLock>;

    /// Block until the write lock is held; interruptible
    fn get_write_lock(&self) -> LockResult<Self::WriteLock>;

    /// Check if any read lock is outstanding
    fn is_reader_active(&self) -> bool;

    /// Check if the write lock is held
    fn is_writer_active(&self) -> bool;

    /// Block until no read lock is outstanding; interruptible
    fn wait_for_active_readers(&self) -> LockResult<()>;

    /// Block until the write lock is not held; interruptible
    fn wait_for_active_writer(&self) -> LockResult<()>;
}
