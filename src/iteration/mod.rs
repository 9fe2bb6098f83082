/*!
 * Lock-Coupled Iteration
 *
 * Adapters that tie the release of a [`Lock`] to the lifecycle of an
 * iteration. The iteration is always closed before the lock is released,
 * and the lock is released exactly once.
 *
 * - [`LockingIteration`]: releases on `close()` or drop
 * - [`LockedIteration`]: additionally releases as soon as the iteration is
 *   observed to be exhausted
 *
 * Both check for exhaustion when wrapping: an iteration that is already
 * empty is closed and its lock released before the constructor returns.
 */

mod wrapper;

pub use wrapper::IterationWrapper;

use crate::errors::LockResult;
use crate::lock::Lock;
use crate::logging::LOG_TARGET;
use std::fmt;
use tracing::error;

/// An iterator holding resources that must be closed
pub trait CloseableIteration: Iterator {
    /// Release the iteration's resources; further `next` calls return `None`
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> LockResult<()>;
}

/// Shared state of both adapters
struct LockCoupling<I: CloseableIteration, L: Lock> {
    inner: I,
    lock: L,
    head: Option<I::Item>,
    closed: bool,
}

impl<I: CloseableIteration, L: Lock> LockCoupling<I, L> {
    fn new(lock: L, mut inner: I) -> LockResult<Self> {
        let head = inner.next();
        let mut coupling = Self {
            inner,
            lock,
            head,
            closed: false,
        };
        if coupling.head.is_none() {
            coupling.close()?;
        }
        Ok(coupling)
    }

    fn next(&mut self) -> Option<I::Item> {
        if self.closed {
            return None;
        }
        self.head.take().or_else(|| self.inner.next())
    }

    /// Close the iteration, then release the lock even if closing failed
    fn close(&mut self) -> LockResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.head = None;

        let closed = self.inner.close();
        let released = if self.lock.is_active() {
            self.lock.release()
        } else {
            Ok(())
        };
        closed.and(released)
    }

    fn close_logged(&mut self) {
        if let Err(e) = self.close() {
            error!(target: LOG_TARGET, error = %e, "Failed to close lock-coupled iteration");
        }
    }
}

impl<I: CloseableIteration, L: Lock> Drop for LockCoupling<I, L> {
    fn drop(&mut self) {
        self.close_logged();
    }
}

/// Holds a lock until the iteration is closed
pub struct LockingIteration<I: CloseableIteration, L: Lock> {
    coupling: LockCoupling<I, L>,
}

impl<I: CloseableIteration, L: Lock> LockingIteration<I, L> {
    /// Couple `lock` to `iter`; releases immediately if `iter` is empty
    pub fn new(lock: L, iter: I) -> LockResult<Self> {
        Ok(Self {
            coupling: LockCoupling::new(lock, iter)?,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.coupling.closed
    }

    /// Check if the coupled lock is still held
    pub fn is_lock_active(&self) -> bool {
        self.coupling.lock.is_active()
    }
}

impl<I: CloseableIteration, L: Lock> Iterator for LockingIteration<I, L> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.coupling.next()
    }
}

impl<I: CloseableIteration, L: Lock> CloseableIteration for LockingIteration<I, L> {
    fn close(&mut self) -> LockResult<()> {
        self.coupling.close()
    }
}

impl<I: CloseableIteration, L: Lock> fmt::Debug for LockingIteration<I, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockingIteration")
            .field("closed", &self.coupling.closed)
            .finish()
    }
}

/// Holds a lock until the iteration is exhausted or closed
pub struct LockedIteration<I: CloseableIteration, L: Lock> {
    coupling: LockCoupling<I, L>,
}

impl<I: CloseableIteration, L: Lock> LockedIteration<I, L> {
    /// Couple `lock` to `iter`; releases immediately if `iter` is empty
    pub fn new(lock: L, iter: I) -> LockResult<Self> {
        Ok(Self {
            coupling: LockCoupling::new(lock, iter)?,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.coupling.closed
    }

    /// Check if the coupled lock is still held
    pub fn is_lock_active(&self) -> bool {
        self.coupling.lock.is_active()
    }
}

impl<I: CloseableIteration, L: Lock> Iterator for LockedIteration<I, L> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.coupling.next();
        if item.is_none() {
            self.coupling.close_logged();
        }
        item
    }
}

impl<I: CloseableIteration, L: Lock> CloseableIteration for LockedIteration<I, L> {
    fn close(&mut self) -> LockResult<()> {
        self.coupling.close()
    }
}

impl<I: CloseableIteration, L: Lock> fmt::Debug for LockedIteration<I, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedIteration")
            .field("closed", &self.coupling.closed)
            .finish()
    }
}
