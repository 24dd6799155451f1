//! Retry policy: decides whether a failed item is retried and how long it waits.

use std::time::Duration;

use crate::error::ProcessError;

/// Retry policy for failed items.
///
/// `attempt_number` is the attempt the item is about to make (1 for the first
/// retry). The engine caps `delay` at `max_queue_delay` and applies
/// `max_attempts` before consulting `should_retry`.
pub trait RetryPolicy<T>: Send + Sync {
    /// Whether the item should be requeued at all.
    fn should_retry(&self, _item: &T, _attempt_number: u32, _error: Option<&ProcessError>) -> bool {
        true
    }

    /// Delay before the given attempt becomes eligible.
    fn delay(&self, attempt_number: u32) -> Duration;
}

/// Quadratic backoff: `delay = base_delay * attempt_number^2`.
///
/// Example with base_delay=1s:
/// - attempt 1: 1s
/// - attempt 2: 4s
/// - attempt 3: 9s
/// - attempt 6: 36s (capped to 30s by the default `max_queue_delay`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuadraticBackoff {
    pub base_delay: Duration,
}

impl QuadraticBackoff {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn next_delay(&self, attempt_number: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt_number.saturating_mul(attempt_number))
    }
}

impl Default for QuadraticBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl<T> RetryPolicy<T> for QuadraticBackoff {
    fn delay(&self, attempt_number: u32) -> Duration {
        self.next_delay(attempt_number)
    }
}

/// Quadratic backoff that only retries while `predicate` agrees.
///
/// ```ignore
/// let policy = RetryIf::new(|_item: &Job, _n, err: Option<&ProcessError>| {
///     err.is_none_or(|e| e.message() != "fatal")
/// });
/// ```
pub struct RetryIf<F> {
    backoff: QuadraticBackoff,
    predicate: F,
}

impl<F> RetryIf<F> {
    pub fn new(predicate: F) -> Self {
        Self {
            backoff: QuadraticBackoff::default(),
            predicate,
        }
    }

    pub fn with_backoff(mut self, backoff: QuadraticBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl<T, F> RetryPolicy<T> for RetryIf<F>
where
    F: Fn(&T, u32, Option<&ProcessError>) -> bool + Send + Sync,
{
    fn should_retry(&self, item: &T, attempt_number: u32, error: Option<&ProcessError>) -> bool {
        (self.predicate)(item, attempt_number, error)
    }

    fn delay(&self, attempt_number: u32) -> Duration {
        self.backoff.next_delay(attempt_number)
    }
}
