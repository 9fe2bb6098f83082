/*!
 * Lock Diagnostics Integration Tests
 *
 * Leak cleanup, stall reports and deadlock reports for every read/write
 * manager, plus cross-manager cycles and the exclusive managers.
 */

mod common;

use common::{alias, capture_logs, events_matching, wait_for_events};
use concurrent_locks::{
    interrupt, DiagnosticsMode, ExclusiveLockManager, Lock, LockConfig, LockError,
    ReadPrefReadWriteLockManager, ReadWriteLockManager, StampedLockManager,
    WritePrefReadWriteLockManager,
};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tracing::Level;

const POLL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

fn tracking(alias: &str) -> LockConfig {
    LockConfig::with_diagnostics(DiagnosticsMode::Tracking)
        .alias(alias)
        .poll_interval(POLL)
}

/// Run `body` on a named thread that reports its interrupt handle first
fn spawn_waiter<F>(name: &str, body: F) -> (interrupt::InterruptHandle, thread::JoinHandle<Result<(), LockError>>)
where
    F: FnOnce() -> Result<(), LockError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            tx.send(interrupt::current()).unwrap();
            body()
        })
        .unwrap();
    (rx.recv().unwrap(), handle)
}

macro_rules! read_write_diagnostics {
    ($module:ident, $manager:ty) => {
        mod $module {
            use super::*;

            fn manager(config: &LockConfig) -> Arc<$manager> {
                Arc::new(<$manager>::with_config(config))
            }

            #[test]
            fn abandoned_write_lock_is_released_and_reported() {
                capture_logs();
                let alias = alias("leak");
                let config = LockConfig::with_diagnostics(DiagnosticsMode::LeakCleanup).alias(&alias);
                let manager = manager(&config);

                let leaked = manager.get_write_lock().unwrap();
                drop(leaked);
                assert!(manager.is_writer_active());

                let mut lock = manager.get_write_lock().unwrap();
                assert!(lock.is_active());
                lock.release().unwrap();

                let events = events_matching(&[&format!("\"{}_WRITE\" lock abandoned", alias)]);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].level, Level::WARN);
                assert!(events[0]
                    .message
                    .contains("consider setting the LOCKS_STACK_TRACE system property"));
            }

            #[test]
            fn abandoned_read_lock_is_released_by_blocked_writer() {
                capture_logs();
                let alias = alias("leak-read");
                let config = LockConfig::with_diagnostics(DiagnosticsMode::TrackingWithStackTrace)
                    .alias(&alias)
                    .poll_interval(POLL);
                let manager = manager(&config);

                let reader = manager.clone();
                thread::Builder::new()
                    .name("leaking-reader".to_string())
                    .spawn(move || drop(reader.get_read_lock().unwrap()))
                    .unwrap()
                    .join()
                    .unwrap();
                assert!(manager.is_reader_active());

                let mut lock = manager.get_write_lock().unwrap();
                lock.release().unwrap();
                assert!(!manager.is_reader_active());

                let events = events_matching(&[&format!(
                    "\"{}_READ\" lock abandoned; lock was acquired in leaking-reader",
                    alias
                )]);
                assert_eq!(events.len(), 1);
                assert!(events[0].message.contains("diagnostics_test.rs"));
            }

            #[test]
            fn try_locks_record_the_caller_site() {
                let config = LockConfig::with_diagnostics(DiagnosticsMode::LeakCleanup);
                let manager = manager(&config);

                let mut write = manager.try_write_lock().unwrap();
                let site = write.record().unwrap().context.location;
                assert!(site.file().ends_with("diagnostics_test.rs"));
                write.release().unwrap();

                let mut read = manager.try_read_lock().unwrap();
                let site = read.record().unwrap().context.location;
                assert!(site.file().ends_with("diagnostics_test.rs"));
                read.release().unwrap();
            }

            #[test]
            fn released_locks_are_not_reported() {
                capture_logs();
                let alias = alias("clean");
                let manager = manager(&tracking(&alias));

                for _ in 0..10 {
                    let mut read = manager.get_read_lock().unwrap();
                    read.release().unwrap();
                    let mut write = manager.get_write_lock().unwrap();
                    write.release().unwrap();
                }

                assert!(events_matching(&[&alias]).is_empty());
            }

            #[test]
            fn panicking_holder_releases_immediately() {
                capture_logs();
                let alias = alias("panic");
                let manager = manager(&tracking(&alias));

                let holder = manager.clone();
                let result = thread::spawn(move || {
                    let _lock = holder.get_write_lock().unwrap();
                    panic!("holder failed");
                })
                .join();

                assert!(result.is_err());
                assert!(!manager.is_writer_active());
                assert!(events_matching(&[&alias, "abandoned"]).is_empty());
            }

            #[test]
            fn stalled_read_is_reported_once() {
                capture_logs();
                let alias = alias("stall");
                let manager = manager(&tracking(&alias));
                let mut write = manager.get_write_lock().unwrap();

                let reader = manager.clone();
                let (_, handle) = spawn_waiter("stalled-reader", move || {
                    let mut read = reader.get_read_lock()?;
                    read.release()
                });

                let needle = format!(
                    "is waiting on a possibly stalled lock \"{}_WRITE\" with id",
                    alias
                );
                assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);
                thread::sleep(POLL * 4);

                write.release().unwrap();
                handle.join().unwrap().unwrap();

                let events = events_matching(&[&needle]);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].level, Level::INFO);
                assert!(events[0].message.contains("Thread stalled-reader"));
                assert!(events[0].message.contains("diagnostics_test.rs"));
                assert!(events_matching(&[&alias, "deadlocked"]).is_empty());
            }

            #[test]
            fn stalled_wait_for_writer_is_reported() {
                capture_logs();
                let alias = alias("stall-wait");
                let manager = manager(&tracking(&alias));
                let mut write = manager.get_write_lock().unwrap();

                let waiter = manager.clone();
                let (interrupt, handle) =
                    spawn_waiter("quiescence", move || waiter.wait_for_active_writer());

                let needle = format!(
                    "is waiting on a possibly stalled lock \"{}_WRITE\" with id",
                    alias
                );
                assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);

                interrupt.interrupt();
                assert_eq!(handle.join().unwrap(), Err(LockError::Interrupted));
                write.release().unwrap();
            }

            #[test]
            fn read_then_write_deadlock_is_reported() {
                capture_logs();
                let alias = alias("deadlock-rw");
                let manager = manager(&tracking(&alias));

                let worker = manager.clone();
                let (interrupt, handle) = spawn_waiter("read-then-write", move || {
                    let mut read = worker.get_read_lock()?;
                    let result = worker.get_write_lock().map(drop);
                    read.release()?;
                    result
                });

                let needle = format!("is possibly deadlocked waiting on \"{}_READ\" with id", alias);
                assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);

                interrupt.interrupt();
                assert_eq!(handle.join().unwrap(), Err(LockError::Interrupted));

                let mut write = manager.get_write_lock().unwrap();
                write.release().unwrap();

                let events = events_matching(&[&alias]);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].level, Level::WARN);
                assert!(events[0].message.contains("diagnostics_test.rs"));
            }

            #[test]
            fn write_then_read_deadlock_is_reported() {
                capture_logs();
                let alias = alias("deadlock-wr");
                let manager = manager(&tracking(&alias));

                let worker = manager.clone();
                let (interrupt, handle) = spawn_waiter("write-then-read", move || {
                    let mut write = worker.get_write_lock()?;
                    let result = worker.get_read_lock().map(drop);
                    write.release()?;
                    result
                });

                let needle = format!("is possibly deadlocked waiting on \"{}_WRITE\" with id", alias);
                assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);

                interrupt.interrupt();
                assert_eq!(handle.join().unwrap(), Err(LockError::Interrupted));

                let mut write = manager.get_write_lock().unwrap();
                assert!(write.is_active());
                write.release().unwrap();
                assert_eq!(events_matching(&[&alias]).len(), 1);
            }

            #[test]
            fn write_then_write_deadlock_is_reported() {
                capture_logs();
                let alias = alias("deadlock-ww");
                let manager = manager(&tracking(&alias));

                let worker = manager.clone();
                let (interrupt, handle) = spawn_waiter("write-then-write", move || {
                    let mut write = worker.get_write_lock()?;
                    let result = worker.get_write_lock().map(drop);
                    write.release()?;
                    result
                });

                let needle = format!("is possibly deadlocked waiting on \"{}_WRITE\" with id", alias);
                assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);

                interrupt.interrupt();
                assert_eq!(handle.join().unwrap(), Err(LockError::Interrupted));

                let mut write = manager.get_write_lock().unwrap();
                write.release().unwrap();
                assert_eq!(events_matching(&[&alias]).len(), 1);
            }

            #[test]
            fn cross_manager_deadlock_is_reported_once() {
                capture_logs();
                let alias = alias("cycle");
                let base = tracking("");
                let x = manager(&base.clone().alias(format!("{}-x", alias)));
                let y = manager(&base.clone().alias(format!("{}-y", alias)));
                let barrier = Arc::new(Barrier::new(2));

                let spawn_pair = |name: &str, first: Arc<$manager>, second: Arc<$manager>| {
                    let barrier = barrier.clone();
                    spawn_waiter(name, move || {
                        let mut held = first.get_write_lock()?;
                        barrier.wait();
                        let result = second.get_write_lock().map(drop);
                        held.release()?;
                        result
                    })
                };
                let (interrupt_a, a) = spawn_pair("cycle-a", x.clone(), y.clone());
                let (interrupt_b, b) = spawn_pair("cycle-b", y.clone(), x.clone());

                let prefix = format!("\"{}-", alias);
                let needles = ["is possibly deadlocked waiting on", prefix.as_str()];
                assert_eq!(wait_for_events(&needles, 1, WAIT).len(), 1);
                thread::sleep(POLL * 6);

                interrupt_a.interrupt();
                interrupt_b.interrupt();
                assert_eq!(a.join().unwrap(), Err(LockError::Interrupted));
                assert_eq!(b.join().unwrap(), Err(LockError::Interrupted));

                let events = events_matching(&needles);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].level, Level::WARN);
                assert!(!x.is_writer_active());
                assert!(!y.is_writer_active());
            }
        }
    };
}

read_write_diagnostics!(read_preferring, ReadPrefReadWriteLockManager);
read_write_diagnostics!(write_preferring, WritePrefReadWriteLockManager);
read_write_diagnostics!(stamped, StampedLockManager);

#[test]
fn exclusive_self_deadlock_is_reported() {
    capture_logs();
    let alias = alias("exclusive");
    let manager = Arc::new(ExclusiveLockManager::with_config(&tracking(&alias)));

    let worker = manager.clone();
    let (interrupt, handle) = spawn_waiter("exclusive-twice", move || {
        let mut lock = worker.get_exclusive_lock()?;
        let result = worker.get_exclusive_lock().map(drop);
        lock.release()?;
        result
    });

    let needle = format!("is possibly deadlocked waiting on \"{}\" with id", alias);
    assert_eq!(wait_for_events(&[&needle], 1, WAIT).len(), 1);

    interrupt.interrupt();
    assert_eq!(handle.join().unwrap(), Err(LockError::Interrupted));
    assert!(!manager.is_active_lock());
}

#[test]
fn exclusive_abandoned_lock_is_released_for_waiter() {
    capture_logs();
    let alias = alias("exclusive-leak");
    let config = LockConfig::with_diagnostics(DiagnosticsMode::LeakCleanup).alias(&alias);
    let manager = ExclusiveLockManager::with_config(&config);

    drop(manager.get_exclusive_lock().unwrap());
    assert!(manager.is_active_lock());

    let mut lock = manager.get_exclusive_lock().unwrap();
    lock.release().unwrap();

    let events = events_matching(&[&format!("\"{}\" lock abandoned", alias)]);
    assert_eq!(events.len(), 1);
}

#[test]
fn exclusive_abandoned_try_lock_names_caller_site() {
    capture_logs();
    let alias = alias("exclusive-try-leak");
    let config = LockConfig::with_diagnostics(DiagnosticsMode::LeakCleanup).alias(&alias);
    let manager = ExclusiveLockManager::with_config(&config);

    drop(manager.try_exclusive_lock().unwrap());
    let mut lock = manager.get_exclusive_lock().unwrap();
    lock.release().unwrap();

    let events = events_matching(&[&format!("\"{}\" lock abandoned", alias)]);
    assert_eq!(events.len(), 1);
    assert!(events[0].message.contains("at tests/diagnostics_test.rs:"));
}
