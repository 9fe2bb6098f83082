/*!
 * Shared test helpers
 *
 * A process-wide tracing layer that records every event so tests can assert
 * on diagnostics logged from any thread. Tests use unique lock aliases and
 * filter the captured events by them.
 */

#![allow(dead_code)]

use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
}

static EVENTS: Mutex<Vec<CapturedEvent>> = parking_lot::const_mutex(Vec::new());
static INSTALL: Once = Once::new();

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{:?}", value);
        } else {
            let _ = write!(self.0, " {}={:?}", field.name(), value);
        }
    }
}

struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        EVENTS.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message,
        });
    }
}

/// Install the capturing subscriber once per test binary
pub fn capture_logs() {
    INSTALL.call_once(|| {
        let _ = tracing_subscriber::registry().with(CaptureLayer).try_init();
    });
}

/// Captured events whose message contains every needle
pub fn events_matching(needles: &[&str]) -> Vec<CapturedEvent> {
    EVENTS
        .lock()
        .iter()
        .filter(|e| needles.iter().all(|n| e.message.contains(n)))
        .cloned()
        .collect()
}

/// Poll until at least `count` matching events were captured
pub fn wait_for_events(needles: &[&str], count: usize, timeout: Duration) -> Vec<CapturedEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let events = events_matching(needles);
        if events.len() >= count || Instant::now() >= deadline {
            return events;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Unique alias for one test; fixed width so no alias is a prefix of another
pub fn alias(name: &str) -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("{}-{:04}", name, NEXT.fetch_add(1, Ordering::Relaxed))
}
