/*!
 * Acquisition Loop
 *
 * The single wait state machine every blocking lock acquisition runs:
 * pause (spin, then yield), drain abandoned locks, report stalls, check
 * interruption. With plain diagnostics the hooks are the unit type and
 * compile down to the pause and the interruption check.
 */

use crate::errors::LockResult;
use crate::interrupt;
use std::hint;
use std::thread;
use std::time::Instant;

/// Spins before the loop starts yielding to the scheduler
const SPIN_LIMIT: u32 = 64;

/// Which side of a manager a waiting thread is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Read,
    Write,
    Exclusive,
}

/// Per-wait bookkeeping owned by one blocked acquisition
#[derive(Debug)]
pub struct WaitState {
    pub(crate) started: Instant,
    pub(crate) next_check: Option<Instant>,
    pub(crate) stall_reported: bool,
    pub(crate) deadlock_reported: bool,
    pub(crate) registered: bool,
}

impl WaitState {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            next_check: None,
            stall_reported: false,
            deadlock_reported: false,
            registered: false,
        }
    }
}

/// Diagnostics hooks invoked by the acquisition loop
///
/// Every method defaults to a no-op so that `()` is the zero-overhead
/// plain implementation.
pub(crate) trait AcquireHooks {
    /// Whether blocking waits must poll so that cleanup can run
    #[inline]
    fn requires_manual_cleanup(&self) -> bool {
        false
    }

    /// Drain abandoned locks
    #[inline]
    fn run_cleanup(&self) {}

    /// Called on every wait iteration with the side being waited on
    #[inline]
    fn waiting(&self, _on: LockKind, _state: &mut WaitState) {}

    /// Called once when a wait that reported itself ends
    #[inline]
    fn done_waiting(&self, _state: &mut WaitState) {}
}

impl AcquireHooks for () {}

/// Wait loop for one blocking acquisition
pub(crate) struct AcquireLoop<'a, H: AcquireHooks + ?Sized> {
    hooks: &'a H,
    state: WaitState,
    spins: u32,
}

impl<'a, H: AcquireHooks + ?Sized> AcquireLoop<'a, H> {
    pub(crate) fn new(hooks: &'a H) -> Self {
        Self {
            hooks,
            state: WaitState::new(),
            spins: 0,
        }
    }

    /// Back off briefly, then run the diagnostics and interruption step
    #[inline]
    pub(crate) fn tick(&mut self, on: LockKind) -> LockResult<()> {
        self.pause();
        self.poll(on)
    }

    /// Diagnostics and interruption step without pausing
    ///
    /// Used by waits that block on their own primitive (condvar, park).
    #[inline]
    pub(crate) fn poll(&mut self, on: LockKind) -> LockResult<()> {
        self.hooks.run_cleanup();
        self.hooks.waiting(on, &mut self.state);
        interrupt::check()
    }

    #[inline]
    fn pause(&mut self) {
        if self.spins < SPIN_LIMIT {
            self.spins += 1;
            hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

impl<H: AcquireHooks + ?Sized> Drop for AcquireLoop<'_, H> {
    fn drop(&mut self) {
        if self.state.registered {
            self.hooks.done_waiting(&mut self.state);
        }
    }
}
