/*!
 * Error Types
 * Centralized lock error handling with thiserror and miette support
 */

use miette::Diagnostic;
use thiserror::Error;

/// Common result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Lock-related errors
///
/// Diagnostics (leak cleanup, stall and deadlock reporting) never produce
/// these; they only log.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum LockError {
    #[error("Illegal lock state: {0}")]
    #[diagnostic(
        code(locks::illegal_state),
        help("A lock handle may be released exactly once, and only after it was acquired.")
    )]
    IllegalState(String),

    #[error("Interrupted while waiting for a lock")]
    #[diagnostic(
        code(locks::interrupted),
        help("The waiting thread was interrupted; no partially acquired lock was kept.")
    )]
    Interrupted,

    #[error("Invalid lock configuration: {0}")]
    #[diagnostic(
        code(locks::invalid_config),
        help("Check the LOCKS_* environment variables or the configuration document.")
    )]
    InvalidConfig(String),
}

impl LockError {
    /// Shorthand for the error raised when releasing an inactive handle
    #[inline]
    pub fn not_locked() -> Self {
        LockError::IllegalState("Trying to release a lock that is not locked".to_string())
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, LockError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            LockError::not_locked().to_string(),
            "Illegal lock state: Trying to release a lock that is not locked"
        );
        assert_eq!(
            LockError::Interrupted.to_string(),
            "Interrupted while waiting for a lock"
        );
    }

    #[test]
    fn test_is_interrupted() {
        assert!(LockError::Interrupted.is_interrupted());
        assert!(!LockError::not_locked().is_interrupted());
    }
}
