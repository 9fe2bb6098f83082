/*!
 * Lock Contract
 *
 * Minimal handle contract shared by every lock manager in the crate.
 */

use crate::errors::{LockError, LockResult};

/// A single-use lock handle
///
/// A handle is created by a successful acquisition and transitions from
/// active to released exactly once. Handles are `Send` so that a lock
/// acquired on one thread can be released on another.
pub trait Lock: Send {
    /// Check if the lock is still held through this handle
    fn is_active(&self) -> bool;

    /// Release the lock
    ///
    /// Returns `Err(LockError::IllegalState)` if already released
    fn release(&mut self) -> LockResult<()>;
}

impl<L: Lock + ?Sized> Lock for Box<L> {
    #[inline]
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    #[inline]
    fn release(&mut self) -> LockResult<()> {
        (**self).release()
    }
}

/// Tracks the active/released transition for handles that own no other state
///
/// Used by handle implementations that need the single-release check
/// before touching their underlying primitive.
#[derive(Debug)]
pub(crate) struct ReleaseOnce {
    active: bool,
}

impl ReleaseOnce {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { active: true }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    /// Flip to released, failing if it already was
    #[inline]
    pub(crate) fn take(&mut self) -> LockResult<()> {
        if !self.active {
            return Err(LockError::not_locked());
        }
        self.active = false;
        Ok(())
    }
}
