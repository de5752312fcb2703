//! Shared operation status for tasks and their workers.

use crate::error::{ReconcileError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct StatusInner {
    cancelled: AtomicBool,
    error: Mutex<Option<ReconcileError>>,
}

/// Cancellation flag plus the first error reported by any worker.
///
/// Clones share the same state, so one handle can be given to every
/// worker thread while the owner polls it between steps.
#[derive(Debug, Clone, Default)]
pub struct OpStatus {
    inner: Arc<StatusInner>,
}

impl OpStatus {
    pub fn new() -> Self {
        OpStatus::default()
    }

    /// Requests cancellation. Workers notice it at their next check.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Records an error; only the first one is kept.
    pub fn set_error(&self, error: ReconcileError) {
        let mut slot = match self.inner.error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            log::debug!("Operation failed: {error}");
            *slot = Some(error);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_message().is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        let slot = match self.inner.error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().map(ToString::to_string)
    }

    /// Takes the recorded error out, leaving the status clean.
    pub fn take_error(&self) -> Option<ReconcileError> {
        let mut slot = match self.inner.error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    /// Whether the operation should stop: cancelled or already failed.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.has_error()
    }

    /// Fail-fast check used between steps.
    ///
    /// Cancellation is reported before a stored error.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match self.take_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let status = OpStatus::new();
        let worker = status.clone();
        worker.set_error(ReconcileError::EmptyResult);
        worker.set_error(ReconcileError::TimedOut);
        assert!(status.should_stop());
        assert!(matches!(status.check(), Err(ReconcileError::EmptyResult)));
        assert!(status.check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared() {
        let status = OpStatus::new();
        assert!(status.check().is_ok());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let status = status.clone();
                std::thread::spawn(move || status.cancel())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(status.is_cancelled());
        assert!(matches!(status.check(), Err(ReconcileError::Cancelled)));
    }
}
