/*!
 * Synchronization Primitives
 *
 * Low-level building blocks shared by the lock managers:
 * - A stamped lock word with write, read and optimistic read modes
 * - The acquisition loop every blocking wait runs
 */

mod spinwait;
mod stamped;

pub use spinwait::LockKind;
pub use stamped::StampedLock;

pub(crate) use spinwait::{AcquireHooks, AcquireLoop, WaitState};
