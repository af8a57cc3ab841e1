//! Cooperative cancellation for long-running backups
//!
//! Walks and archive writers poll a [`CancelToken`] between files. A token is
//! cancelled explicitly through its [`CancelHandle`] or implicitly once its
//! deadline passes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{BackupError, BackupResult};

/// Why an operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit request through the handle
    Requested,
    /// Deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "cancellation requested"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Cloneable token observed by workers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Handle that triggers cancellation
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancel every token sharing this handle
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a token/handle pair with an optional timeout
    pub fn new(timeout: Option<Duration>) -> (Self, CancelHandle) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let token = Self {
            cancelled: cancelled.clone(),
            deadline: timeout.map(|t| Instant::now() + t),
        };
        (token, CancelHandle { cancelled })
    }

    /// Why the token is cancelled, if it is
    pub fn reason(&self) -> Option<CancelReason> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Some(CancelReason::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Fail with `Cancelled` if the token has fired
    pub fn check(&self, what: &str) -> BackupResult<()> {
        match self.reason() {
            Some(reason) => Err(BackupError::Cancelled(format!("{}: {}", what, reason))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_token_never_fires() {
        let token = CancelToken::none();
        assert!(!token.is_cancelled());
        assert!(token.check("walk").is_ok());
    }

    #[test]
    fn test_handle_cancels_all_clones() {
        let (token, handle) = CancelToken::new(None);
        let clone = token.clone();

        handle.cancel();

        assert_eq!(token.reason(), Some(CancelReason::Requested));
        assert!(clone.is_cancelled());
        assert!(matches!(
            clone.check("archive"),
            Err(BackupError::Cancelled(_))
        ));
    }

    #[test]
    fn test_deadline_fires() {
        let (token, _handle) = CancelToken::new(Some(Duration::ZERO));
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn test_future_deadline_does_not_fire() {
        let (token, _handle) = CancelToken::new(Some(Duration::from_secs(3600)));
        assert!(!token.is_cancelled());
    }
}
