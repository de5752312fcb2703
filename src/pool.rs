//! Bounded worker pool for per-chunk aligner jobs.
//!
//! Jobs are fed through a bounded channel, so no more than `threads` jobs
//! are queued ahead of the workers. Results come back in job order.

use crate::error::{ReconcileError, Result};
use crate::status::OpStatus;
use log::{debug, trace};
use std::sync::mpsc::{channel, sync_channel};
use std::sync::Mutex;
use std::thread;

/// Runs `work` on every job with at most `threads` workers.
///
/// Stops handing out jobs once `status` is cancelled or a job failed; the
/// first error (or `Cancelled`) is returned and completed results are
/// discarded.
pub fn run_bounded<T, R, F>(
    jobs: Vec<T>,
    threads: usize,
    status: &OpStatus,
    work: F,
) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R> + Sync,
{
    let total = jobs.len();
    let workers = threads.max(1).min(total.max(1));
    debug!("Running {total} jobs on {workers} workers");

    let (job_tx, job_rx) = sync_channel::<(usize, T)>(workers);
    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = channel::<(usize, R)>();

    thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = &job_rx;
            let result_tx = result_tx.clone();
            let work = &work;
            scope.spawn(move || loop {
                let next = match job_rx.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };
                let Ok((index, job)) = next else { break };
                if status.should_stop() {
                    continue;
                }
                trace!("Worker {worker} takes job {index}");
                match work(index, job) {
                    Ok(result) => {
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                    Err(e) => status.set_error(e),
                }
            });
        }
        drop(result_tx);

        // Blocks while every worker is busy and the queue is full
        for job in jobs.into_iter().enumerate() {
            if status.should_stop() || job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    status.check()?;

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    for (index, result) in result_rx.try_iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| ReconcileError::AlignerFailed(format!("job {i} produced no result")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_keep_job_order() {
        let status = OpStatus::new();
        let jobs: Vec<usize> = (0..20).collect();
        let results = run_bounded(jobs, 4, &status, |_, job| Ok(job * 2)).unwrap();
        assert_eq!(results, (0..20).map(|j| j * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_more_workers_than_threads() {
        let status = OpStatus::new();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded((0..16).collect(), 3, &status, |_, _: usize| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_first_error_is_returned() {
        let status = OpStatus::new();
        let result = run_bounded((0..8).collect(), 2, &status, |i, _: usize| {
            if i == 3 {
                Err(ReconcileError::EmptyResult)
            } else {
                Ok(i)
            }
        });
        assert!(matches!(result, Err(ReconcileError::EmptyResult)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let status = OpStatus::new();
        status.cancel();
        let ran = AtomicUsize::new(0);
        let result = run_bounded((0..8).collect(), 2, &status, |_, _: usize| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_job_list() {
        let status = OpStatus::new();
        let results: Vec<()> = run_bounded(Vec::<()>::new(), 4, &status, |_, _| Ok(())).unwrap();
        assert!(results.is_empty());
    }
}
