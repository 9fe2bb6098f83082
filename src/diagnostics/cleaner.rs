/*!
 * Abandoned Lock Cleanup
 *
 * Handles dropped while still active are queued here instead of being
 * released in their destructor. The queue is drained at the next
 * acquisition attempt or wait iteration on the same manager, which
 * force-releases each lock and logs where it was acquired.
 */

use super::context::LockRecord;
use super::tracking::Tracker;
use crate::config::STACK_TRACE_ENV;
use crate::lock::Lock;
use crate::logging::LOG_TARGET;
use crossbeam_queue::SegQueue;
use smartstring::alias::String as SmartString;
use std::sync::Arc;
use tracing::{error, warn};

struct Abandoned<L> {
    lock: L,
    record: Arc<LockRecord>,
}

/// Queue of abandoned locks for one monitoring instance
pub(crate) struct LockCleaner<L: Lock> {
    queue: SegQueue<Abandoned<L>>,
}

impl<L: Lock> LockCleaner<L> {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub(crate) fn abandon(&self, lock: L, record: Arc<LockRecord>) {
        self.queue.push(Abandoned { lock, record });
    }

    #[inline]
    pub(crate) fn has_abandoned(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Force-release every queued lock; returns how many were released
    pub(crate) fn drain(&self, alias: &SmartString, stack_trace: bool, tracker: Option<&Tracker>) -> usize {
        let mut released = 0;

        while let Some(Abandoned { mut lock, record }) = self.queue.pop() {
            if let Some(tracker) = tracker {
                tracker.untrack(record.id);
            }

            if let Err(e) = lock.release() {
                error!(target: LOG_TARGET, alias = %alias, error = %e, "Failed to release abandoned lock");
                continue;
            }
            released += 1;

            if stack_trace {
                warn!(
                    target: LOG_TARGET,
                    "\"{}\" lock abandoned; lock was acquired in {} {}",
                    alias,
                    record.context.thread_name,
                    record.context
                );
            } else {
                warn!(
                    target: LOG_TARGET,
                    "\"{}\" lock abandoned; consider setting the {} system property to capture a backtrace; acquired in thread {} {}",
                    alias,
                    STACK_TRACE_ENV,
                    record.context.thread_name,
                    record.context
                );
            }
        }

        released
    }
}
