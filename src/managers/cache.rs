/*!
 * Read-Mostly Cache
 *
 * A lazily computed shared value guarded by a [`StampedLockManager`].
 *
 * ## States
 *
 * - [`ReadableState`]: read lock held; populates on first access by taking
 *   the write lock and downgrading back to a read lock
 * - [`WritableState`]: write lock held; may purge the value
 * - [`OptimisticState`]: no lock; data is handed out only while the
 *   optimistic stamp still validates
 *
 * The value lives in an `ArcSwapOption` so optimistic readers never race a
 * concurrent purge.
 */

use super::stamped::{OptimisticReadLock, StampedLockManager, StampedReadLock, StampedWriteLock};
use super::ReadWriteLockManager;
use crate::diagnostics::MonitoredLock;
use crate::errors::{LockError, LockResult};
use crate::lock::Lock;
use crate::logging::LOG_TARGET;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;
use tracing::error;

type Supplier<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Lazily computed value guarded by a stamped lock manager
pub struct Cache<T> {
    manager: Arc<StampedLockManager>,
    data: ArcSwapOption<T>,
    supplier: Supplier<T>,
}

impl<T> Cache<T> {
    pub fn new<F>(manager: Arc<StampedLockManager>, supplier: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            manager,
            data: ArcSwapOption::empty(),
            supplier: Box::new(supplier),
        }
    }

    /// Manager guarding this cache
    pub fn manager(&self) -> &Arc<StampedLockManager> {
        &self.manager
    }

    /// Check if a value is currently cached
    pub fn is_populated(&self) -> bool {
        self.data.load().is_some()
    }

    /// Compute and store the value unless present; caller holds the write lock
    fn populate(&self) -> Arc<T> {
        if let Some(data) = self.data.load_full() {
            return data;
        }
        let data = Arc::new((self.supplier)());
        self.data.store(Some(data.clone()));
        data
    }

    /// Read access, populating the value on first use
    #[track_caller]
    pub fn get_read_state(&self) -> LockResult<ReadableState<T>> {
        let mut read_lock = self.manager.get_read_lock()?;

        let data = match self.data.load_full() {
            Some(data) => data,
            None => {
                read_lock.release()?;
                let write_lock = self.manager.get_write_lock()?;
                let data = self.populate();
                read_lock = self.manager.convert_to_read_lock(write_lock)?;
                data
            }
        };

        Ok(ReadableState {
            data,
            lock: read_lock,
        })
    }

    /// Exclusive access for mutation or purge
    #[track_caller]
    pub fn get_write_state(&self) -> LockResult<WritableState<'_, T>> {
        let lock = self.manager.get_write_lock()?;
        Ok(WritableState {
            cache: self,
            lock,
            purged: false,
        })
    }

    /// Lock-free access for speculative fast paths
    ///
    /// Populates the value first if needed. The returned state is invalid
    /// (no data) if a writer is active or the value was purged in between.
    #[track_caller]
    pub fn get_optimistic_state(&self) -> LockResult<OptimisticState<T>> {
        if !self.is_populated() {
            let mut write_lock = self.manager.get_write_lock()?;
            self.populate();
            write_lock.release()?;
        }
        Ok(self.optimistic_snapshot())
    }

    /// Stamp first, then the value it covers
    fn optimistic_snapshot(&self) -> OptimisticState<T> {
        match (self.manager.get_optimistic_read_lock(), self.data.load_full()) {
            (Some(lock), Some(data)) => OptimisticState {
                data: Some(data),
                lock: Some(lock),
            },
            _ => OptimisticState {
                data: None,
                lock: None,
            },
        }
    }

    /// Populate the value eagerly
    #[track_caller]
    pub fn warm_up(&self) -> LockResult<()> {
        let mut state = self.get_write_state()?;
        state.data()?;
        state.close()
    }
}

impl<T> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("populated", &self.is_populated())
            .field("manager", &self.manager)
            .finish()
    }
}

fn release_on_drop<L: Lock>(lock: &mut L) {
    if lock.is_active() {
        if let Err(e) = lock.release() {
            error!(target: LOG_TARGET, error = %e, "Failed to release cache state lock");
        }
    }
}

/// Cached value plus the read lock protecting it
pub struct ReadableState<T> {
    data: Arc<T>,
    lock: MonitoredLock<StampedReadLock>,
}

impl<T> ReadableState<T> {
    /// The cached value; fails once the read lock is released
    pub fn data(&self) -> LockResult<Arc<T>> {
        if !self.lock.is_active() {
            return Err(LockError::IllegalState(
                "Read lock has been released".to_string(),
            ));
        }
        Ok(self.data.clone())
    }

    /// The cached value, releasing the read lock in the same step
    pub fn data_and_release(&mut self) -> LockResult<Arc<T>> {
        let data = self.data()?;
        self.lock.release()?;
        Ok(data)
    }

    pub fn is_active(&self) -> bool {
        self.lock.is_active()
    }

    pub fn close(&mut self) -> LockResult<()> {
        self.lock.release()
    }
}

impl<T> Drop for ReadableState<T> {
    fn drop(&mut self) {
        release_on_drop(&mut self.lock);
    }
}

/// Write lock on a cache
pub struct WritableState<'a, T> {
    cache: &'a Cache<T>,
    lock: MonitoredLock<StampedWriteLock>,
    purged: bool,
}

impl<T> WritableState<'_, T> {
    fn check_active(&self) -> LockResult<()> {
        if self.lock.is_active() {
            Ok(())
        } else {
            Err(LockError::IllegalState(
                "Write lock has been released".to_string(),
            ))
        }
    }

    /// Drop the cached value
    pub fn purge(&mut self) -> LockResult<()> {
        self.check_active()?;
        self.purged = true;
        self.cache.data.store(None);
        Ok(())
    }

    /// The cached value, computing it if absent
    ///
    /// Fails after [`purge`](Self::purge) on this state.
    pub fn data(&mut self) -> LockResult<Arc<T>> {
        self.check_active()?;
        if self.purged {
            return Err(LockError::IllegalState(
                "Cache was previously purged by this object".to_string(),
            ));
        }
        Ok(self.cache.populate())
    }

    pub fn is_active(&self) -> bool {
        self.lock.is_active()
    }

    pub fn close(&mut self) -> LockResult<()> {
        self.lock.release()
    }
}

impl<T> Drop for WritableState<'_, T> {
    fn drop(&mut self) {
        release_on_drop(&mut self.lock);
    }
}

/// Optimistically read value, valid only while no write intervened
pub struct OptimisticState<T> {
    data: Option<Arc<T>>,
    lock: Option<OptimisticReadLock>,
}

impl<T> OptimisticState<T> {
    /// Check that no write happened since the state was taken
    pub fn is_valid(&self) -> bool {
        self.lock.as_ref().is_some_and(|lock| lock.validate())
    }

    /// The value if the state still validates
    pub fn data(&self) -> Option<Arc<T>> {
        if self.is_valid() {
            self.data.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cache() -> (Cache<usize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = Cache::new(Arc::new(StampedLockManager::new()), move || {
            counter.fetch_add(1, Ordering::SeqCst) + 1
        });
        (cache, calls)
    }

    #[test]
    fn test_read_state_populates_once() {
        let (cache, calls) = counting_cache();

        let mut first = cache.get_read_state().unwrap();
        assert_eq!(*first.data().unwrap(), 1);
        assert!(cache.manager().is_reader_active());
        assert_eq!(*first.data_and_release().unwrap(), 1);
        assert!(first.data().is_err());

        let second = cache.get_read_state().unwrap();
        assert_eq!(*second.data().unwrap(), 1);
        drop(second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.manager().is_reader_active());
    }

    #[test]
    fn test_purge_forces_recompute() {
        let (cache, calls) = counting_cache();
        cache.warm_up().unwrap();
        assert!(cache.is_populated());

        let mut state = cache.get_write_state().unwrap();
        state.purge().unwrap();
        assert!(matches!(state.data(), Err(LockError::IllegalState(_))));
        state.close().unwrap();
        assert!(state.purge().is_err());

        assert!(!cache.is_populated());
        let read = cache.get_read_state().unwrap();
        assert_eq!(*read.data().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_optimistic_state_invalidated_by_write() {
        let (cache, _) = counting_cache();

        let optimistic = cache.get_optimistic_state().unwrap();
        assert!(optimistic.is_valid());
        assert_eq!(optimistic.data().as_deref(), Some(&1));

        let mut state = cache.get_write_state().unwrap();
        assert!(!optimistic.is_valid());
        assert!(optimistic.data().is_none());

        let during_write = cache.get_optimistic_state();
        state.close().unwrap();
        drop(state);
        // taken while the writer was active: never valid
        assert!(!during_write.unwrap().is_valid());
    }

    #[test]
    fn test_optimistic_snapshot_of_purged_value_is_invalid() {
        let (cache, _) = counting_cache();
        cache.warm_up().unwrap();
        assert!(cache.optimistic_snapshot().is_valid());

        let mut state = cache.get_write_state().unwrap();
        state.purge().unwrap();
        state.close().unwrap();
        drop(state);

        // no writer is active, but there is nothing to validate against
        let snapshot = cache.optimistic_snapshot();
        assert!(!snapshot.is_valid());
        assert!(snapshot.data().is_none());

        let repopulated = cache.get_optimistic_state().unwrap();
        assert!(repopulated.is_valid());
        assert_eq!(repopulated.data().as_deref(), Some(&2));
    }
}
