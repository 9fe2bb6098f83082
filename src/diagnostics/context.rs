/*!
 * Acquisition Context
 *
 * Who acquired a monitored lock and where: thread identity, thread name,
 * caller location and an optional captured backtrace.
 */

use smartstring::alias::String as SmartString;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Instant;

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the acquiring thread plus the acquisition site
#[derive(Debug)]
pub struct AcquisitionContext {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub location: &'static Location<'static>,
    pub backtrace: Option<Backtrace>,
}

impl AcquisitionContext {
    /// Capture the context of the calling thread
    pub fn capture(location: &'static Location<'static>, with_backtrace: bool) -> Self {
        let current = thread::current();
        Self {
            thread_id: current.id(),
            thread_name: thread_display_name(&current),
            location,
            backtrace: with_backtrace.then(Backtrace::force_capture),
        }
    }
}

impl fmt::Display for AcquisitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.location)?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n{}", backtrace)?;
        }
        Ok(())
    }
}

/// Name of a thread, falling back to its id
pub(crate) fn thread_display_name(thread: &thread::Thread) -> String {
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// Monitoring record for one outstanding lock
#[derive(Debug)]
pub struct LockRecord {
    pub id: u64,
    pub alias: SmartString,
    pub context: AcquisitionContext,
    pub acquired_at: Instant,
}

impl LockRecord {
    pub(crate) fn new(alias: &SmartString, context: AcquisitionContext) -> Self {
        Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            alias: alias.clone(),
            context,
            acquired_at: Instant::now(),
        }
    }
}
