/*!
 * Thread Interruption
 *
 * Cooperative cancellation for blocking lock acquisition. Every thread owns
 * an interrupt flag; another thread holding an [`InterruptHandle`] may set
 * it. Blocking lock operations poll the flag on every wait iteration and
 * return [`LockError::Interrupted`] after clearing it.
 */

use crate::errors::{LockError, LockResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

thread_local! {
    static FLAG: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// Handle used to interrupt a specific thread
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl InterruptHandle {
    /// Request interruption of the target thread
    ///
    /// The target observes the request at its next wait iteration.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Check if an interruption is pending (does not clear it)
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Thread this handle interrupts
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

/// Get an interrupt handle for the calling thread
pub fn current() -> InterruptHandle {
    InterruptHandle {
        flag: FLAG.with(Arc::clone),
        thread: thread::current(),
    }
}

/// Test and clear the calling thread's interrupt flag
#[inline]
pub fn interrupted() -> bool {
    FLAG.with(|flag| {
        flag.load(Ordering::Relaxed) && flag.swap(false, Ordering::AcqRel)
    })
}

/// Return `Err(Interrupted)` if the calling thread was interrupted
#[inline]
pub fn check() -> LockResult<()> {
    if interrupted() {
        Err(LockError::Interrupted)
    } else {
        Ok(())
    }
}
