//! Bounded CPU worker pool
//!
//! Codec encode/decode and policy training are CPU-bound; they run on a
//! fixed-size rayon pool so they never stall the async executor. Results are
//! handed back through a tokio oneshot channel.

use crate::{Error, Result};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Fixed-size rayon pool bridged to async callers.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (0 = one per logical CPU).
    ///
    /// # Errors
    /// Returns `WorkerPool` if the OS refuses to spawn the threads.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("trueno-cache-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(format!("failed to build pool: {e}")))?;
        let threads = pool.current_num_threads();
        tracing::debug!(threads, "worker pool started");
        Ok(Self { pool, threads })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Run `job` on the pool and await its result.
    ///
    /// # Errors
    /// Returns `WorkerPool` if the job panicked.
    pub async fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(outcome);
        });
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::WorkerPool("job panicked".to_string())),
            Err(_) => Err(Error::WorkerPool(
                "job dropped before completion".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish()
    }
}

/// Await `fut`, failing with `DependencyTimeout` after `timeout`.
///
/// # Errors
/// Propagates the inner error, or `DependencyTimeout` on expiry.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if let Ok(result) = tokio::time::timeout(timeout, fut).await {
        result
    } else {
        tracing::warn!(operation, timeout_ms = timeout.as_millis(), "dependency timed out");
        Err(Error::DependencyTimeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Run blocking I/O on tokio's blocking pool.
///
/// # Errors
/// Propagates the closure's error; a panicked task maps to `Other`.
pub async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("{operation} task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);
        let sum = pool.run(|| (1..=100).sum::<u32>()).await.unwrap();
        assert_eq!(sum, 5050);
    }

    #[tokio::test]
    async fn test_run_reports_panic() {
        let pool = WorkerPool::new(1).unwrap();
        let err = pool
            .run(|| -> u32 { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkerPool(_)));

        // Pool still usable afterwards
        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let err = with_timeout("kv.get", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DependencyTimeout { timeout_ms: 10, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let v = with_timeout("kv.get", Duration::from_secs(1), async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn test_blocking_propagates_error() {
        let err = blocking("disk.read", || -> Result<()> {
            Err(Error::storage("disk", "gone"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::StorageIo { .. }));
    }
}
