/*!
 * Reader/Writer Core
 *
 * The algorithm shared by the read-preferring, write-preferring and
 * long-adder managers: one exclusive primitive (the write mode of a
 * [`StampedLock`]) plus two monotonically increasing reader counters.
 *
 * # Protocol
 *
 * - A reader increments `locked`, then waits while the primitive is
 *   write-held. Releasing a read increments `unlocked`.
 * - A writer takes the primitive, then waits for `locked == unlocked` for
 *   at most `write_preference` iterations. If readers are still active it
 *   releases the primitive, yields and starts over. Without this back-off a
 *   thread holding one read lock and asking for a second would never let
 *   the reader count reach zero.
 * - A deferring (write-preferring) reader waits for the primitive to be
 *   free *before* registering and backs out again if a writer slipped in.
 *
 * Both counters and the primitive are updated with `SeqCst` so that a
 * reader's increment and a writer's acquisition are totally ordered.
 */

use crate::errors::LockResult;
use crate::sync::{AcquireHooks, AcquireLoop, LockKind, StampedLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Reader counter on its own cache line
#[repr(C, align(64))]
#[derive(Debug, Default)]
struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    #[inline]
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn load(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment unless the counter has reached `limit`
    #[inline]
    fn increment_below(&self, limit: &PaddedCounter) -> bool {
        let mut current = self.load();
        loop {
            if current >= limit.load() {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Exclusive primitive plus locked/unlocked reader counters
#[derive(Debug)]
pub(crate) struct ReaderWriterCore {
    primitive: StampedLock,
    locked: PaddedCounter,
    unlocked: PaddedCounter,
    write_preference: u32,
    bounded_wait: Duration,
}

impl ReaderWriterCore {
    pub(crate) fn new(write_preference: u32, bounded_wait: Duration) -> Self {
        Self {
            primitive: StampedLock::new(),
            locked: PaddedCounter::default(),
            unlocked: PaddedCounter::default(),
            write_preference: write_preference.max(1),
            bounded_wait,
        }
    }

    #[inline]
    pub(crate) fn write_preference(&self) -> u32 {
        self.write_preference
    }

    /// Check if any reader is registered
    #[inline]
    pub(crate) fn is_reader_active(&self) -> bool {
        // unlocked first: both only grow, so equality here means no reader
        let unlocked = self.unlocked.load();
        let locked = self.locked.load();
        locked != unlocked
    }

    #[inline]
    pub(crate) fn is_writer_active(&self) -> bool {
        self.primitive.is_write_locked()
    }

    /// Blocking read acquisition
    ///
    /// With `defer` set, the reader does not register while a writer holds
    /// the primitive.
    pub(crate) fn read<H: AcquireHooks + ?Sized>(&self, hooks: &H, defer: bool) -> LockResult<()> {
        if defer {
            self.read_deferred(hooks)
        } else {
            self.read_eager(hooks)
        }
    }

    fn read_eager<H: AcquireHooks + ?Sized>(&self, hooks: &H) -> LockResult<()> {
        self.locked.increment();
        if !self.primitive.is_write_locked() {
            return Ok(());
        }

        let mut wait = AcquireLoop::new(hooks);
        while self.primitive.is_write_locked() {
            if let Err(e) = wait.tick(LockKind::Write) {
                self.unlocked.increment();
                return Err(e);
            }
        }
        Ok(())
    }

    fn read_deferred<H: AcquireHooks + ?Sized>(&self, hooks: &H) -> LockResult<()> {
        let mut wait: Option<AcquireLoop<'_, H>> = None;

        loop {
            while self.primitive.is_write_locked() {
                wait.get_or_insert_with(|| AcquireLoop::new(hooks))
                    .tick(LockKind::Write)?;
            }

            self.locked.increment();
            if !self.primitive.is_write_locked() {
                return Ok(());
            }

            // a writer got in between the check and the increment
            self.unlocked.increment();
        }
    }

    /// Non-blocking read acquisition
    pub(crate) fn try_read(&self, defer: bool) -> bool {
        if defer && self.primitive.is_write_locked() {
            return false;
        }
        self.locked.increment();
        if self.primitive.is_write_locked() {
            self.unlocked.increment();
            return false;
        }
        true
    }

    #[inline]
    pub(crate) fn unlock_read(&self) {
        self.unlocked.increment();
    }

    /// Release a read only if one is registered; `false` if none is
    #[inline]
    pub(crate) fn try_unlock_read(&self) -> bool {
        self.unlocked.increment_below(&self.locked)
    }

    /// Blocking write acquisition; returns the primitive's write stamp
    pub(crate) fn write<H: AcquireHooks + ?Sized>(&self, hooks: &H) -> LockResult<u64> {
        let mut wait = AcquireLoop::new(hooks);

        loop {
            let stamp = acquire_stamp(
                hooks,
                &mut wait,
                LockKind::Write,
                self.bounded_wait,
                || self.primitive.write_lock_interruptibly(),
                |timeout| self.primitive.try_write_lock_for(timeout),
            )?;

            for _ in 0..self.write_preference {
                if !self.is_reader_active() {
                    return Ok(stamp);
                }
                if let Err(e) = wait.tick(LockKind::Read) {
                    self.primitive.unlock_write(stamp)?;
                    return Err(e);
                }
            }
            if !self.is_reader_active() {
                return Ok(stamp);
            }

            // readers still active: let them make progress and retry
            self.primitive.unlock_write(stamp)?;
            thread::yield_now();
        }
    }

    /// Non-blocking write acquisition
    pub(crate) fn try_write(&self) -> Option<u64> {
        let stamp = self.primitive.try_write_lock();
        if stamp == 0 {
            return None;
        }
        if self.is_reader_active() {
            let released = self.primitive.unlock_write(stamp);
            debug_assert!(released.is_ok(), "fresh write stamp rejected: {:?}", released);
            return None;
        }
        Some(stamp)
    }

    #[inline]
    pub(crate) fn unlock_write(&self, stamp: u64) -> LockResult<()> {
        self.primitive.unlock_write(stamp)
    }

    /// Busy-poll until no reader is registered
    pub(crate) fn wait_for_readers<H: AcquireHooks + ?Sized>(&self, hooks: &H) -> LockResult<()> {
        spin_while(hooks, LockKind::Read, || self.is_reader_active())
    }

    /// Busy-poll until the primitive is not write-held
    pub(crate) fn wait_for_writer<H: AcquireHooks + ?Sized>(&self, hooks: &H) -> LockResult<()> {
        spin_while(hooks, LockKind::Write, || self.is_writer_active())
    }
}

/// Take a stamp from a blocking primitive
///
/// With plain hooks this is the primitive's own interruptible wait. When the
/// hooks need periodic cleanup the wait is split into bounded slices with a
/// cleanup and stall check between them.
pub(crate) fn acquire_stamp<H, B, T>(
    hooks: &H,
    wait: &mut AcquireLoop<'_, H>,
    kind: LockKind,
    bounded_wait: Duration,
    blocking: B,
    bounded: T,
) -> LockResult<u64>
where
    H: AcquireHooks + ?Sized,
    B: FnOnce() -> LockResult<u64>,
    T: Fn(Duration) -> LockResult<u64>,
{
    if !hooks.requires_manual_cleanup() {
        return blocking();
    }

    loop {
        let stamp = bounded(bounded_wait)?;
        if stamp != 0 {
            return Ok(stamp);
        }
        wait.poll(kind)?;
    }
}

/// Spin with the acquisition loop while `busy` holds
pub(crate) fn spin_while<H, F>(hooks: &H, kind: LockKind, busy: F) -> LockResult<()>
where
    H: AcquireHooks + ?Sized,
    F: Fn() -> bool,
{
    if !busy() {
        return Ok(());
    }
    let mut wait = AcquireLoop::new(hooks);
    while busy() {
        wait.tick(kind)?;
    }
    Ok(())
}
