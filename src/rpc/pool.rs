use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::error::Aborted;

/// Caps how many tasks run at once across every worker of a host.
///
/// Cancellation only applies while a task waits for a slot; once started a
/// task always runs to completion.
#[derive(Debug, Clone)]
pub struct Pool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl Pool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn with_available_parallelism() -> Self {
        let size = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(size)
    }

    pub fn running(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    pub async fn submit<F, Fut>(
        &self,
        task: F,
        cancel: &CancellationToken,
    ) -> Result<Fut::Output, Aborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            tracing::debug!("pool.task_aborted");
            return Err(Aborted);
        };
        if cancel.is_cancelled() {
            tracing::debug!("pool.task_aborted");
            return Err(Aborted);
        }
        tracing::trace!(running = self.running(), size = self.size, "pool.task_started");
        Ok(task().await)
    }
}
