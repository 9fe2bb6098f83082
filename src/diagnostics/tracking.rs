/*!
 * Stall and Deadlock Tracking
 *
 * Keeps a weakly-referenced registry of the outstanding locks of one
 * monitoring instance. A thread that has waited longer than the poll
 * interval inspects the holders of the lock it waits on:
 *
 * - If following "holder is itself waiting on" edges through the shared
 *   [`WaitGraph`] leads back to the waiting thread, it logs a possible
 *   deadlock (once per cycle signature).
 * - Otherwise it logs a possible stall (once per wait).
 *
 * Reporting only: nothing is interrupted or released.
 */

use super::context::{thread_display_name, LockRecord};
use crate::logging::LOG_TARGET;
use crate::sync::WaitState;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use smartstring::alias::String as SmartString;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Registry of blocked threads and the tracker each one waits on
///
/// Shared by every manager built from clones of the same `LockConfig`, so
/// cycles spanning several managers are visible.
#[derive(Default)]
pub struct WaitGraph {
    waiting: DashMap<ThreadId, Weak<Tracker>, RandomState>,
    reported: Mutex<HashSet<Vec<u64>>>,
}

impl std::fmt::Debug for WaitGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGraph")
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

impl WaitGraph {
    fn register(&self, thread: ThreadId, tracker: &Arc<Tracker>) {
        self.waiting.insert(thread, Arc::downgrade(tracker));
    }

    fn unregister(&self, thread: ThreadId) {
        self.waiting.remove(&thread);
    }

    /// Number of threads currently registered as blocked
    pub fn waiting_threads(&self) -> usize {
        self.waiting.len()
    }

    fn waited_on(&self, thread: ThreadId) -> Option<Arc<Tracker>> {
        self.waiting.get(&thread).and_then(|entry| entry.value().upgrade())
    }

    /// Search for a path of holders from `start` back to `me`
    ///
    /// Returns the records along the cycle, ending with one held by `me`.
    fn find_cycle(&self, me: ThreadId, start: &Tracker) -> Option<Vec<Arc<LockRecord>>> {
        let mut visited: HashSet<ThreadId> = HashSet::new();
        let mut frontier: Vec<Vec<Arc<LockRecord>>> = Vec::new();

        for holder in start.holders() {
            if holder.context.thread_id == me {
                return Some(vec![holder]);
            }
            frontier.push(vec![holder]);
        }

        while let Some(path) = frontier.pop() {
            let holder_thread = path[path.len() - 1].context.thread_id;
            if !visited.insert(holder_thread) {
                continue;
            }
            let Some(next) = self.waited_on(holder_thread) else {
                continue;
            };
            for holder in next.holders() {
                let mut extended = path.clone();
                let closes = holder.context.thread_id == me;
                extended.push(holder);
                if closes {
                    return Some(extended);
                }
                frontier.push(extended);
            }
        }

        None
    }

    /// Record a cycle; false if the same cycle was reported before
    fn mark_reported(&self, cycle: &[Arc<LockRecord>]) -> bool {
        let mut signature: Vec<u64> = cycle.iter().map(|r| r.id).collect();
        signature.sort_unstable();
        self.reported.lock().insert(signature)
    }
}

/// Active-lock registry of one monitoring instance
pub struct Tracker {
    alias: SmartString,
    poll_interval: Duration,
    active: DashMap<u64, Weak<LockRecord>, RandomState>,
    graph: Arc<WaitGraph>,
}

impl Tracker {
    pub(crate) fn new(alias: SmartString, poll_interval: Duration, graph: Arc<WaitGraph>) -> Self {
        Self {
            alias,
            poll_interval,
            active: DashMap::with_hasher(RandomState::new()),
            graph,
        }
    }

    pub(crate) fn track(&self, record: &Arc<LockRecord>) {
        self.active.insert(record.id, Arc::downgrade(record));
    }

    pub(crate) fn untrack(&self, id: u64) {
        self.active.remove(&id);
    }

    /// Number of live entries in the active set
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|e| e.value().strong_count() > 0).count()
    }

    /// Snapshot of the live holders, oldest first; prunes dead entries
    pub(crate) fn holders(&self) -> Vec<Arc<LockRecord>> {
        let mut live = Vec::new();
        let mut dead = Vec::new();

        for entry in self.active.iter() {
            match entry.value().upgrade() {
                Some(record) => live.push(record),
                None => dead.push(*entry.key()),
            }
        }

        // removing while iterating would deadlock the shard
        for id in dead {
            self.active.remove_if(&id, |_, weak| weak.strong_count() == 0);
        }

        live.sort_unstable_by_key(|r| r.id);
        live
    }

    /// Wait-iteration hook: report stalls and deadlocks after the poll interval
    pub(crate) fn waiting(self: &Arc<Self>, state: &mut WaitState) {
        let now = Instant::now();
        if now.duration_since(state.started) < self.poll_interval {
            return;
        }
        if let Some(next) = state.next_check {
            if now < next {
                return;
            }
        }
        state.next_check = Some(now + self.poll_interval);

        let current = thread::current();
        let me = current.id();
        self.graph.register(me, self);
        state.registered = true;

        if state.deadlock_reported {
            return;
        }

        let holders = self.holders();
        if holders.is_empty() {
            return;
        }

        if let Some(cycle) = self.graph.find_cycle(me, self) {
            state.deadlock_reported = true;
            if self.graph.mark_reported(&cycle) {
                warn!(
                    target: LOG_TARGET,
                    "Thread {} is possibly deadlocked waiting on \"{}\" with id {}{}",
                    thread_display_name(&current),
                    self.alias,
                    cycle[0].id,
                    describe_holders(&cycle)
                );
            }
            return;
        }

        if !state.stall_reported {
            state.stall_reported = true;
            info!(
                target: LOG_TARGET,
                "Thread {} is waiting on a possibly stalled lock \"{}\" with id {}{}",
                thread_display_name(&current),
                self.alias,
                holders[0].id,
                describe_holders(&holders)
            );
        }
    }

    pub(crate) fn done_waiting(&self, state: &mut WaitState) {
        self.graph.unregister(thread::current().id());
        state.registered = false;
    }
}

fn describe_holders(records: &[Arc<LockRecord>]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = write!(
            out,
            "\n\"{}\" with id {} was acquired in {} {}",
            record.alias, record.id, record.context.thread_name, record.context
        );
    }
    out
}
