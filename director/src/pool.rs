//! Bounded-concurrency worker pool for batch operations.
//!
//! Tasks are spawned onto a `JoinSet` but only execute while holding one
//! of N semaphore permits, so a large batch never runs more than N
//! workers at once. Each worker carries a logical name in its tracing
//! span; agent log lines correlate on it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument};

/// Fixed-size pool of named workers.
///
/// `join_all` waits for every queued task (success or failure), returns
/// the first task error, and logs the rest. Nothing is swallowed
/// silently: worker panics are re-raised once the drain completes.
pub struct WorkerPool<E> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<Result<(), E>>,
}

impl<E> WorkerPool<E>
where
    E: std::fmt::Display + Send + 'static,
{
    /// Create a pool running at most `max_workers` tasks concurrently.
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            set: JoinSet::new(),
        }
    }

    /// Queue a task under a named worker slot.
    pub fn spawn<F>(&mut self, name: String, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let span = tracing::info_span!("worker", name = %name);

        let _abort_handle = self.set.spawn(
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("pool semaphore closed");
                debug!("Worker slot acquired");
                task.await
            }
            .instrument(span),
        );
    }

    /// Wait for every queued task to finish.
    ///
    /// Returns the first task error after all outstanding work has
    /// drained; additional errors are logged. Panics from workers are
    /// resumed on the caller once the drain completes.
    pub async fn join_all(mut self) -> Result<(), E> {
        let mut first_error = None;
        let mut panic = None;

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        warn!(error = %e, "Additional worker failure");
                    }
                }
                Err(join_error) if join_error.is_panic() => {
                    error!("Worker panicked");
                    panic.get_or_insert(join_error);
                }
                Err(join_error) => {
                    warn!(error = %join_error, "Worker aborted");
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some(join_error) = panic {
            std::panic::resume_unwind(join_error.into_panic());
        }
        Ok(())
    }
}
