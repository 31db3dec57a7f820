//! Retry decisions with capped exponential backoff.

use notify_queue_core::Task;
use rand::Rng;
use std::time::Duration;

/// Why an attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Recoverable handler error
    Error(String),
    /// Deadline exceeded; recoverable like any other failure
    Timeout(Duration),
    /// Handler signalled the task must not be retried
    SkipRetry(String),
    /// No handler is registered for the task's type
    Unroutable,
}

impl FailureKind {
    pub fn message(&self, task: &Task) -> String {
        match self {
            FailureKind::Error(msg) => msg.clone(),
            FailureKind::Timeout(d) => format!("task timed out after {:?}", d),
            FailureKind::SkipRetry(msg) => format!("skip retry: {}", msg),
            FailureKind::Unroutable => {
                format!("unroutable task: no handler registered for {}", task.task_type)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue into the original queue once `delay` has elapsed
    Retry { delay: Duration },
    /// Fail permanently and keep a dead-letter record
    DeadLetter { reason: String },
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Fraction of the delay added at random (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(3600),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    /// Delay before retrying after the given (one-indexed) attempt failed.
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = match 1u32.checked_shl(exponent) {
            Some(factor) => self.base_delay.saturating_mul(factor).min(self.max_delay),
            None if self.base_delay.is_zero() => Duration::ZERO,
            None => self.max_delay,
        };

        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0)));
        (delay + extra).min(self.max_delay)
    }

    /// Decide what happens to a task whose current attempt failed
    pub fn decide(&self, task: &Task, failure: &FailureKind) -> RetryDecision {
        match failure {
            FailureKind::SkipRetry(_) | FailureKind::Unroutable => RetryDecision::DeadLetter {
                reason: failure.message(task),
            },
            FailureKind::Error(_) | FailureKind::Timeout(_) if task.can_retry() => {
                RetryDecision::Retry {
                    delay: self.backoff(task.attempt),
                }
            }
            FailureKind::Error(_) | FailureKind::Timeout(_) => RetryDecision::DeadLetter {
                reason: format!(
                    "retries exhausted after {} attempts: {}",
                    task.attempt,
                    failure.message(task)
                ),
            },
        }
    }
}
