//! Heavy-Work Executor
//!
//! Modules hand expensive, blocking computations to an executor instead of
//! running them on their node task. The default `BlockingPool` runs jobs on
//! tokio's blocking thread pool, limited to a fixed number of concurrent
//! workers.

use std::any::Any;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;

use crate::error::{PipelineError, Result};

/// Type-erased job output.
pub type JobOutput = Box<dyn Any + Send>;

/// A job: a function with its arguments already captured.
pub type Job = Box<dyn FnOnce() -> JobOutput + Send>;

/// Runs jobs outside the calling node's task.
pub trait HeavyExecutor: Send + Sync + 'static {
    /// Run `job` on a worker and resolve with its output.
    fn execute(&self, job: Job) -> BoxFuture<'static, Result<JobOutput>>;
}

/// Executor backed by `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl BlockingPool {
    /// Create a pool that runs at most `workers` jobs at once.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Maximum number of concurrent jobs.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl HeavyExecutor for BlockingPool {
    fn execute(&self, job: Job) -> BoxFuture<'static, Result<JobOutput>> {
        let permits = Arc::clone(&self.permits);
        async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Worker {
                    reason: "worker pool closed".to_string(),
                })?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(|err| PipelineError::Worker {
                reason: if err.is_panic() {
                    "job panicked".to_string()
                } else {
                    "job was cancelled".to_string()
                },
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_job_and_returns_output() {
        let pool = BlockingPool::new(2);
        let output = pool
            .execute(Box::new(|| Box::new(21 * 2) as JobOutput))
            .await
            .unwrap();
        assert_eq!(*output.downcast::<i32>().unwrap(), 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn panicking_job_is_a_worker_error() {
        let pool = BlockingPool::new(1);
        let err = pool
            .execute(Box::new(|| -> JobOutput { panic!("job exploded") }))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Worker { ref reason } if reason == "job panicked"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_workers() {
        let pool = BlockingPool::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.execute(Box::new(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                current.fetch_sub(1, Ordering::SeqCst);
                Box::new(()) as JobOutput
            }))
        });

        for result in futures_util::future::join_all(jobs).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.workers(), 2);
    }
}
