//! Cooperative cancellation primitives.
//!
//! Work is raced against a monitor that sleeps `poll_interval` and then checks
//! an externally supplied stop predicate. Whichever finishes first wins; the
//! loser is dropped, which cancels it at its next suspension point.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::domain::errors::{Cancelled, DomainError, DomainResult};
use crate::domain::models::ShouldStop;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Resolve once the predicate fires. Pending forever when it is unarmed.
async fn wait_for_stop(should_stop: &ShouldStop, poll_interval: Duration) {
    if !should_stop.is_armed() {
        return std::future::pending().await;
    }
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    loop {
        tokio::time::sleep(poll_interval).await;
        if should_stop.is_set() {
            return;
        }
    }
}

/// Race `work` against the stop predicate.
///
/// With an unarmed predicate the work runs unmodified. A predicate that is
/// already set cancels before the work is ever polled.
pub async fn run_with_cancellation<F, T>(
    work: F,
    should_stop: &ShouldStop,
    poll_interval: Duration,
) -> Result<T, Cancelled>
where
    F: Future<Output = T>,
{
    if !should_stop.is_armed() {
        return Ok(work.await);
    }
    if should_stop.is_set() {
        return Err(Cancelled);
    }

    tokio::select! {
        biased;
        out = work => Ok(out),
        () = wait_for_stop(should_stop, poll_interval) => {
            debug!("stop predicate fired, dropping in-flight work");
            Err(Cancelled)
        }
    }
}

/// [`run_with_cancellation`] for fallible work, flattening the cancellation
/// into [`DomainError::Cancelled`].
pub async fn run_cancellable<F, T>(
    work: F,
    should_stop: &ShouldStop,
    poll_interval: Duration,
) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    run_with_cancellation(work, should_stop, poll_interval).await?
}

/// Per-slot outcome of a fan-out.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(DomainError),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FanOutResult<T> {
    /// One slot per input task, in input order.
    pub outcomes: Vec<TaskOutcome<T>>,
    /// The stop predicate fired before every task finished.
    pub stopped: bool,
}

impl<T> FanOutResult<T> {
    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Cancelled))
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }
}

/// Run every task concurrently under one shared stop monitor.
///
/// When the predicate fires, every still-running task is dropped and marked
/// [`TaskOutcome::Cancelled`]; results that already arrived are kept. A task
/// that itself returns [`DomainError::Cancelled`] is also recorded as
/// cancelled. With `return_exceptions` false the first real error drops the
/// remaining tasks and is returned; with it true errors are kept per slot.
pub async fn gather_fan_out<F, T>(
    tasks: Vec<F>,
    should_stop: &ShouldStop,
    poll_interval: Duration,
    return_exceptions: bool,
) -> DomainResult<FanOutResult<T>>
where
    F: Future<Output = DomainResult<T>>,
{
    let total = tasks.len();
    let mut slots: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();

    if should_stop.is_set() {
        return Ok(FanOutResult {
            outcomes: (0..total).map(|_| TaskOutcome::Cancelled).collect(),
            stopped: true,
        });
    }

    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| async move { (index, task.await) })
        .collect();

    let monitor = wait_for_stop(should_stop, poll_interval);
    tokio::pin!(monitor);

    let mut stopped = false;
    loop {
        tokio::select! {
            biased;
            next = pending.next() => match next {
                Some((index, Ok(value))) => slots[index] = Some(TaskOutcome::Done(value)),
                Some((index, Err(err))) if err.is_cancelled() => {
                    slots[index] = Some(TaskOutcome::Cancelled);
                }
                Some((index, Err(err))) => {
                    if !return_exceptions {
                        return Err(err);
                    }
                    slots[index] = Some(TaskOutcome::Failed(err));
                }
                None => break,
            },
            () = &mut monitor => {
                stopped = true;
                break;
            }
        }
    }
    drop(pending);

    let outcomes: Vec<TaskOutcome<T>> = slots
        .into_iter()
        .map(|slot| slot.unwrap_or(TaskOutcome::Cancelled))
        .collect();

    if stopped {
        debug!(
            total,
            cancelled = outcomes
                .iter()
                .filter(|o| matches!(o, TaskOutcome::Cancelled))
                .count(),
            "fan-out stopped"
        );
    }

    Ok(FanOutResult { outcomes, stopped })
}
