//! Bounded-concurrency gate shared by every model-call site.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ShouldStop;

use super::cancellation::{run_cancellable, run_with_cancellation};

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// One counting semaphore plus worker-thread offload for CPU-bound steps.
///
/// Cloning shares the same semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    poll_interval: Duration,
}

impl ConcurrencyController {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            poll_interval,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. Waiting is itself cancellable; a waiter dropped
    /// because the predicate fired never takes a permit.
    pub async fn acquire(&self, should_stop: &ShouldStop) -> DomainResult<OwnedSemaphorePermit> {
        let acquired = run_with_cancellation(
            self.semaphore.clone().acquire_owned(),
            should_stop,
            self.poll_interval,
        )
        .await?;
        acquired.map_err(|_| DomainError::ExecutionFailed("concurrency gate closed".to_string()))
    }

    /// Run one model call under a permit, racing it against the stop predicate.
    pub async fn call<F, T>(&self, should_stop: &ShouldStop, work: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        let _permit = self.acquire(should_stop).await?;
        run_cancellable(work, should_stop, self.poll_interval).await
    }

    /// Run a synchronous CPU-bound step on the blocking pool so it never
    /// stalls the cancellation monitor.
    pub async fn offload<F, T>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Ok(tokio::task::spawn_blocking(f).await?)
    }
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY, Duration::from_millis(500))
    }
}
