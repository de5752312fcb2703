//! Timeout support for alignment tasks

use crate::error::{ReconcileError, Result};
use crate::status::OpStatus;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs `job` on a helper thread, cancelling it after `timeout`.
///
/// On timeout `status` is cancelled and the call waits for the job to
/// notice before returning [`ReconcileError::TimedOut`].
pub fn run_with_timeout<T, F>(status: &OpStatus, timeout: Duration, job: F) -> Result<T>
where
    T: Send,
    F: FnOnce(&OpStatus) -> Result<T> + Send,
{
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        scope.spawn(move || {
            let _ = tx.send(job(status));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("Alignment did not finish within {timeout:?}, cancelling");
                status.cancel();
                Err(ReconcileError::TimedOut)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ReconcileError::AlignerFailed(
                "Alignment thread crashed".to_string(),
            )),
        }
    })
}

/// Applies the `max_secs` budget of a task; 0 means no limit.
pub fn run_with_budget<T, F>(status: &OpStatus, max_secs: u64, job: F) -> Result<T>
where
    T: Send,
    F: FnOnce(&OpStatus) -> Result<T> + Send,
{
    if max_secs == 0 {
        job(status)
    } else {
        run_with_timeout(status, Duration::from_secs(max_secs), job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finishes_in_time() {
        let status = OpStatus::new();
        let value = run_with_timeout(&status, Duration::from_secs(5), |_| Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(!status.is_cancelled());
    }

    #[test]
    fn test_timeout_cancels_job() {
        let status = OpStatus::new();
        let result: Result<()> = run_with_timeout(&status, Duration::from_millis(20), |status| {
            while !status.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(ReconcileError::Cancelled)
        });
        assert!(matches!(result, Err(ReconcileError::TimedOut)));
        assert!(status.is_cancelled());
    }

    #[test]
    fn test_zero_budget_runs_inline() {
        let status = OpStatus::new();
        let value = run_with_budget(&status, 0, |_| Ok("done")).unwrap();
        assert_eq!(value, "done");
    }
}
