/*!
 * Stamped Lock Primitive
 *
 * A single-word lock with three stamp-producing modes: exclusive write,
 * shared read and optimistic read. Blocking waits park through
 * parking_lot_core keyed on the state word's address.
 *
 * # State Layout
 *
 * - bits 0..32: active reader count
 * - bit 32: write bit
 * - bits 33..64: version, bumped by every write release
 *
 * A write stamp always has the write bit set, so it is never zero. The
 * version starts at one, so optimistic stamps are never zero either.
 *
 * # Writer Preference
 *
 * A writer that has to wait registers itself in `queued_writers` until it
 * acquires, times out or is interrupted. New readers are refused while any
 * writer is queued, so a stream of overlapping readers cannot starve a
 * writer. Readers already holding the lock are unaffected; the lock is not
 * reentrant for readers once a writer queues.
 */

use crate::errors::{LockError, LockResult};
use crate::interrupt;
use parking_lot_core::{park, unpark_all, SpinWait, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const RBITS: u64 = 0xFFFF_FFFF;
const WBIT: u64 = 1 << 32;
const SBITS: u64 = !RBITS;
const ORIGIN: u64 = WBIT << 1;

/// Longest single park; bounds how late an interrupt is observed
const PARK_SLICE: Duration = Duration::from_millis(10);

/// Stamp-based read/write lock
///
/// Stamps are plain `u64` values; zero means "not acquired". Unlock
/// operations validate their stamp and return `IllegalState` on mismatch.
#[repr(C, align(64))]
pub struct StampedLock {
    state: AtomicU64,
    waiters: AtomicUsize,
    queued_writers: AtomicUsize,
}

impl StampedLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(ORIGIN),
            waiters: AtomicUsize::new(0),
            queued_writers: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn key(&self) -> usize {
        &self.state as *const AtomicU64 as usize
    }

    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & WBIT != 0
    }

    #[inline]
    pub fn is_read_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & RBITS != 0
    }

    /// Check if a blocked writer is waiting for the lock
    #[inline]
    pub fn has_queued_writers(&self) -> bool {
        self.queued_writers.load(Ordering::SeqCst) != 0
    }

    /// Try to take the write lock, returning a stamp or 0
    #[inline]
    pub fn try_write_lock(&self) -> u64 {
        let s = self.state.load(Ordering::Relaxed);
        if s & (RBITS | WBIT) != 0 {
            return 0;
        }
        let next = s + WBIT;
        match self
            .state
            .compare_exchange(s, next, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => next,
            Err(_) => 0,
        }
    }

    /// Try to take a read lock, returning a stamp or 0
    ///
    /// Fails while the lock is write-held or a writer is queued.
    #[inline]
    pub fn try_read_lock(&self) -> u64 {
        if self.has_queued_writers() {
            return 0;
        }
        let mut s = self.state.load(Ordering::Relaxed);
        loop {
            if s & WBIT != 0 || s & RBITS == RBITS {
                return 0;
            }
            match self.state.compare_exchange_weak(
                s,
                s + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return s + 1,
                Err(current) => s = current,
            }
        }
    }

    /// Block until the write lock is held; interruptible
    pub fn write_lock_interruptibly(&self) -> LockResult<u64> {
        self.acquire_write(None)
    }

    /// Block until a read lock is held; interruptible
    pub fn read_lock_interruptibly(&self) -> LockResult<u64> {
        self.acquire(Self::try_read_lock, Self::read_blocked, None)
    }

    /// Wait up to `timeout` for the write lock; `Ok(0)` on timeout
    pub fn try_write_lock_for(&self, timeout: Duration) -> LockResult<u64> {
        self.acquire_write(Some(Instant::now() + timeout))
    }

    /// Wait up to `timeout` for a read lock; `Ok(0)` on timeout
    pub fn try_read_lock_for(&self, timeout: Duration) -> LockResult<u64> {
        self.acquire(
            Self::try_read_lock,
            Self::read_blocked,
            Some(Instant::now() + timeout),
        )
    }

    fn write_blocked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & (RBITS | WBIT) != 0
    }

    fn read_blocked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & WBIT != 0 || self.has_queued_writers()
    }

    /// Write acquisition that holds back new readers while it waits
    fn acquire_write(&self, deadline: Option<Instant>) -> LockResult<u64> {
        let stamp = self.try_write_lock();
        if stamp != 0 {
            return Ok(stamp);
        }

        self.queued_writers.fetch_add(1, Ordering::SeqCst);
        let result = self.acquire(Self::try_write_lock, Self::write_blocked, deadline);
        // parked readers re-check within one park slice; no wake needed
        self.queued_writers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn acquire(
        &self,
        try_lock: fn(&Self) -> u64,
        blocked: fn(&Self) -> bool,
        deadline: Option<Instant>,
    ) -> LockResult<u64> {
        let mut spin = SpinWait::new();

        loop {
            let stamp = try_lock(self);
            if stamp != 0 {
                return Ok(stamp);
            }

            interrupt::check()?;

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Ok(0);
                }
            }

            if spin.spin() {
                continue;
            }

            let slice = now + PARK_SLICE;
            let park_until = deadline.map_or(slice, |d| d.min(slice));

            self.waiters.fetch_add(1, Ordering::SeqCst);
            // SAFETY: the key is the address of our own state word, which
            // outlives the park call; the callbacks do not panic or park.
            unsafe {
                park(
                    self.key(),
                    || blocked(self),
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    Some(park_until),
                );
            }
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            spin.reset();
        }
    }

    #[inline]
    fn wake(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            // SAFETY: unpark_all only touches the parking lot bucket for this key.
            unsafe {
                unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
            }
        }
    }

    /// Release the write lock held with `stamp`
    pub fn unlock_write(&self, stamp: u64) -> LockResult<()> {
        if stamp & WBIT == 0 || self.state.load(Ordering::SeqCst) != stamp {
            return Err(LockError::IllegalState(
                "Stamp does not match the held write lock".to_string(),
            ));
        }
        self.state.store(next_version(stamp), Ordering::SeqCst);
        self.wake();
        Ok(())
    }

    /// Release a read lock taken with `stamp`
    pub fn unlock_read(&self, stamp: u64) -> LockResult<()> {
        let mut s = self.state.load(Ordering::SeqCst);
        loop {
            if stamp & RBITS == 0 || (s & SBITS) != (stamp & SBITS) || s & RBITS == 0 {
                return Err(LockError::IllegalState(
                    "Stamp does not match a held read lock".to_string(),
                ));
            }
            match self.state.compare_exchange_weak(
                s,
                s - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if (s - 1) & RBITS == 0 {
                        self.wake();
                    }
                    return Ok(());
                }
                Err(current) => s = current,
            }
        }
    }

    /// Take an optimistic read stamp, or 0 if write-locked
    #[inline]
    pub fn try_optimistic_read(&self) -> u64 {
        let s = self.state.load(Ordering::SeqCst);
        if s & WBIT == 0 {
            s & SBITS
        } else {
            0
        }
    }

    /// Check that no write happened since `stamp` was issued
    #[inline]
    pub fn validate(&self, stamp: u64) -> bool {
        fence(Ordering::Acquire);
        stamp != 0 && (stamp & SBITS) == (self.state.load(Ordering::SeqCst) & SBITS)
    }

    /// Atomically downgrade a write stamp to a read stamp
    ///
    /// Returns 0 if `stamp` is not the currently held write stamp. There is
    /// no instant at which neither lock is held.
    pub fn try_convert_to_read_lock(&self, stamp: u64) -> u64 {
        if stamp & WBIT == 0 {
            return 0;
        }
        let read_stamp = next_version(stamp) + 1;
        match self
            .state
            .compare_exchange(stamp, read_stamp, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => {
                self.wake();
                read_stamp
            }
            Err(_) => 0,
        }
    }
}

impl Default for StampedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StampedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.load(Ordering::Relaxed);
        f.debug_struct("StampedLock")
            .field("write_locked", &(s & WBIT != 0))
            .field("readers", &(s & RBITS))
            .field("queued_writers", &self.queued_writers.load(Ordering::Relaxed))
            .field("version", &(s >> 33))
            .finish()
    }
}

/// State after releasing a write stamp: write bit cleared, version bumped
#[inline]
fn next_version(write_stamp: u64) -> u64 {
    match write_stamp.wrapping_add(WBIT) {
        0 => ORIGIN,
        next => next,
    }
}
