//! Ordered forward steps with compensating actions.
//!
//! A transaction is a list of [`Step`]s. Each step performs one persistent side
//! effect and returns a value; its compensation receives that value and undoes
//! the effect. Steps run strictly in order. The first failing step aborts the
//! sequence, every step that already succeeded is compensated in reverse
//! registration order, and the *original* error is returned.
//!
//! ```text
//! forward:      A ──► B ──► C ✗
//! compensate:         B' ◄── (then) A'
//! result:       Err(TransactionError { error: C's error, compensation_failures })
//! ```
//!
//! Compensations hit by transient failures are retried under a bounded
//! [`RetryPolicy`]; a compensation that still fails is recorded as a
//! [`CompensationFailure`] next to the original error, never in its place.

use crate::retry::{RetryPolicy, retry_with_predicate};
use charterbook_core::{BookingError, CompensationFailure};
use crate::metrics;
use ::metrics::counter;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future returned by step actions.
pub type StepFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

type Forward<T, E> = Box<dyn FnOnce(&[T]) -> StepFuture<T, E> + Send>;
type Compensate<T, E> = Arc<dyn Fn(T) -> StepFuture<(), E> + Send + Sync>;

/// Errors a step can fail with.
pub trait StepError: std::error::Error + Send + 'static {
    /// Whether re-running a failed compensation may succeed.
    fn is_transient(&self) -> bool {
        false
    }
}

impl StepError for BookingError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// One forward action paired with the compensation that undoes it.
pub struct Step<T, E> {
    name: String,
    forward: Forward<T, E>,
    compensate: Option<Compensate<T, E>>,
}

impl<T, E> Step<T, E>
where
    T: Send + 'static,
    E: StepError,
{
    /// Create a step.
    ///
    /// `forward` receives the results of all earlier steps, in order.
    /// `compensate` receives this step's own result and may be invoked more than
    /// once, so it must be idempotent.
    pub fn new<F, Fut, C, CFut>(name: impl Into<String>, forward: F, compensate: C) -> Self
    where
        F: FnOnce(&[T]) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: Fn(T) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(move |prior: &[T]| -> StepFuture<T, E> { Box::pin(forward(prior)) }),
            compensate: Some(Arc::new(move |value: T| -> StepFuture<(), E> {
                Box::pin(compensate(value))
            })),
        }
    }

    /// Create a step with nothing to undo.
    pub fn irreversible<F, Fut>(name: impl Into<String>, forward: F) -> Self
    where
        F: FnOnce(&[T]) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(move |prior: &[T]| -> StepFuture<T, E> { Box::pin(forward(prior)) }),
            compensate: None,
        }
    }

    /// The step's name, used in logs and compensation reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T, E> std::fmt::Debug for Step<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("compensated", &self.compensate.is_some())
            .finish_non_exhaustive()
    }
}

/// A failed transaction: the step error plus any compensation that could not run.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct TransactionError<E: std::error::Error + 'static> {
    /// The forward-step error that triggered rollback.
    #[source]
    pub error: E,
    /// Compensations that failed during rollback; empty on a clean rollback.
    pub compensation_failures: Vec<CompensationFailure>,
}

impl<E: std::error::Error + 'static> TransactionError<E> {
    /// Whether every compensation succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.compensation_failures.is_empty()
    }

    /// Discard the compensation report and keep the original error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

/// An error raised before any step ran has nothing to compensate.
impl<E: std::error::Error + 'static> From<E> for TransactionError<E> {
    fn from(error: E) -> Self {
        Self {
            error,
            compensation_failures: Vec::new(),
        }
    }
}

struct LogEntry<T, E> {
    step: String,
    result: T,
    compensate: Option<Compensate<T, E>>,
}

/// Completed steps of one transaction attempt, in registration order.
struct TransactionLog<T, E> {
    entries: Vec<LogEntry<T, E>>,
}

impl<T, E> TransactionLog<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: StepError,
{
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn results(&self) -> Vec<T> {
        self.entries.iter().map(|e| e.result.clone()).collect()
    }

    fn record(&mut self, step: String, result: T, compensate: Option<Compensate<T, E>>) {
        self.entries.push(LogEntry {
            step,
            result,
            compensate,
        });
    }

    fn commit(self) -> Vec<T> {
        self.entries.into_iter().map(|e| e.result).collect()
    }

    async fn roll_back(self, policy: &RetryPolicy) -> Vec<CompensationFailure> {
        let mut failures = Vec::new();

        for entry in self.entries.into_iter().rev() {
            let Some(compensate) = entry.compensate else {
                continue;
            };

            let outcome = retry_with_predicate(
                policy,
                || (*compensate)(entry.result.clone()),
                <E as StepError>::is_transient,
            )
            .await;

            match outcome.result {
                Ok(()) => {
                    tracing::debug!(step = %entry.step, attempts = outcome.attempts, "Step compensated");
                    counter!(metrics::COMPENSATIONS_TOTAL, "step" => entry.step.clone(), "outcome" => "ok")
                        .increment(1);
                }
                Err(err) => {
                    tracing::error!(
                        step = %entry.step,
                        attempts = outcome.attempts,
                        error = %err,
                        "Compensation failed; manual reconciliation required"
                    );
                    counter!(metrics::COMPENSATIONS_TOTAL, "step" => entry.step.clone(), "outcome" => "failed")
                        .increment(1);
                    failures.push(CompensationFailure {
                        step: entry.step,
                        attempts: outcome.attempts,
                        reason: err.to_string(),
                    });
                }
            }
        }

        failures
    }
}

/// Run `steps` in order, compensating completed steps if one fails.
///
/// Returns every step's result, in order, on success.
///
/// This future runs to a terminal state once polled to completion; callers that
/// must survive their own cancellation should drive it on a spawned task.
///
/// # Errors
///
/// Returns the first failing step's error, after rollback, together with any
/// compensation failures.
pub async fn run<T, E>(
    steps: Vec<Step<T, E>>,
    policy: &RetryPolicy,
) -> Result<Vec<T>, TransactionError<E>>
where
    T: Clone + Send + Sync + 'static,
    E: StepError,
{
    let mut log = TransactionLog::new();

    for step in steps {
        let prior = log.results();
        match (step.forward)(&prior).await {
            Ok(result) => {
                tracing::trace!(step = %step.name, "Step completed");
                log.record(step.name, result, step.compensate);
            }
            Err(error) => {
                tracing::warn!(
                    step = %step.name,
                    completed = log.entries.len(),
                    error = %error,
                    "Step failed, rolling back"
                );
                let compensation_failures = log.roll_back(policy).await;
                return Err(TransactionError {
                    error,
                    compensation_failures,
                });
            }
        }
    }

    Ok(log.commit())
}
