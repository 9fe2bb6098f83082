/*!
 * Long-Adder Lock Manager Tests
 *
 * Property tests drive random try/unlock sequences against a simple model
 * of the reader count and writer flag.
 */

use concurrent_locks::managers::READ_LOCK_STAMP;
use concurrent_locks::{LockError, StampedLongAdderLockManager};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
enum Op {
    TryRead,
    UnlockRead,
    TryWrite,
    UnlockWrite,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::TryRead),
        Just(Op::UnlockRead),
        Just(Op::TryWrite),
        Just(Op::UnlockWrite),
    ]
}

proptest! {
    #[test]
    fn prop_matches_reader_writer_model(ops in prop::collection::vec(op(), 1..200)) {
        let manager = StampedLongAdderLockManager::new();
        let mut readers = 0usize;
        let mut write_stamp: Option<u64> = None;

        for op in ops {
            match op {
                Op::TryRead => {
                    let stamp = manager.try_read_lock();
                    if write_stamp.is_some() {
                        prop_assert_eq!(stamp, 0);
                    } else {
                        prop_assert_eq!(stamp, READ_LOCK_STAMP);
                        readers += 1;
                    }
                }
                Op::UnlockRead if readers > 0 => {
                    manager.unlock_read(READ_LOCK_STAMP).unwrap();
                    readers -= 1;
                }
                Op::UnlockRead => {
                    let result = manager.unlock_read(READ_LOCK_STAMP);
                    prop_assert!(matches!(result, Err(LockError::IllegalState(_))));
                }
                Op::TryWrite => {
                    let stamp = manager.try_write_lock();
                    if write_stamp.is_some() || readers > 0 {
                        prop_assert_eq!(stamp, 0);
                    } else {
                        prop_assert_ne!(stamp, 0);
                        prop_assert_ne!(stamp, READ_LOCK_STAMP);
                        write_stamp = Some(stamp);
                    }
                }
                Op::UnlockWrite => {
                    if let Some(stamp) = write_stamp.take() {
                        manager.unlock_write(stamp).unwrap();
                    }
                }
            }

            prop_assert_eq!(manager.is_reader_active(), readers > 0);
            prop_assert_eq!(manager.is_writer_active(), write_stamp.is_some());
        }
    }

    #[test]
    fn prop_foreign_read_stamps_are_rejected(stamp in any::<u64>()) {
        prop_assume!(stamp != READ_LOCK_STAMP);
        let manager = StampedLongAdderLockManager::new();
        prop_assert!(matches!(manager.unlock_read(stamp), Err(LockError::IllegalState(_))));
        prop_assert!(!manager.is_reader_active());
    }
}

#[test]
fn test_unbalanced_read_unlock_leaves_writers_free() {
    let manager = StampedLongAdderLockManager::new();
    assert!(matches!(
        manager.unlock_read(READ_LOCK_STAMP),
        Err(LockError::IllegalState(_))
    ));
    assert!(!manager.is_reader_active());

    let stamp = manager.try_write_lock();
    assert_ne!(stamp, 0);
    manager.unlock_write(stamp).unwrap();

    let read = manager.read_lock().unwrap();
    manager.unlock_read(read).unwrap();
    assert!(manager.unlock_read(read).is_err());
    assert!(!manager.is_reader_active());
}

#[test]
fn test_blocking_locks_exclude_each_other() {
    let manager = Arc::new(StampedLongAdderLockManager::new());
    let counter = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..6)
        .map(|id| {
            let manager = manager.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    if id % 2 == 0 {
                        let stamp = manager.write_lock().unwrap();
                        // non-atomic read-modify-write is safe only under the write lock
                        let value = counter.load(Ordering::Relaxed);
                        counter.store(value + 1, Ordering::Relaxed);
                        manager.unlock_write(stamp).unwrap();
                    } else {
                        let stamp = manager.read_lock().unwrap();
                        assert!(!manager.is_writer_active());
                        manager.unlock_read(stamp).unwrap();
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1_500);
    manager.wait_for_active_readers().unwrap();
    manager.wait_for_active_writer().unwrap();
}
