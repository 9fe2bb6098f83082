/*!
 * Concurrent Locks Library
 * Read/write and exclusive lock managers with pluggable leak and deadlock diagnostics
 */

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod interrupt;
pub mod iteration;
pub mod lock;
pub mod logging;
pub mod managers;
pub mod sync;

// Re-exports
pub use config::{DiagnosticsMode, LockConfig, LockDiagnostics};
pub use diagnostics::{LockMonitoring, MonitoredLock};
pub use errors::*;
pub use interrupt::InterruptHandle;
pub use iteration::{CloseableIteration, IterationWrapper, LockedIteration, LockingIteration};
pub use lock::Lock;
pub use logging::init_tracing;
pub use managers::{
    Cache, ExclusiveLockManager, ExclusiveReentrantLockManager, ReadPrefReadWriteLockManager,
    ReadWriteLockManager, StampedLockManager, StampedLongAdderLockManager,
    WritePrefReadWriteLockManager,
};
