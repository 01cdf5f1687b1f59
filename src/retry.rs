//! Bounded retry with exponential backoff for remote calls.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::error::RemoteError;

/// How many times a remote call is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy. `max_attempts` counts the first try and is at least one.
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(16) as u32;
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(usize) -> Result<T, RemoteError>,
    {
        let mut attempt = 1usize;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => {
                    return Err(RetryFailure::NonRetryable { attempt, error });
                }
                Err(last) if attempt >= self.max_attempts => {
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(err) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        %label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(16))
    }
}

/// Outcome of a call that did not succeed under a [`RetryPolicy`].
#[derive(Debug, Clone, Error)]
pub enum RetryFailure {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Error from the final attempt.
        last: RemoteError,
    },
    /// An attempt failed with an error that retrying cannot fix.
    #[error("attempt {attempt} failed permanently: {error}")]
    NonRetryable {
        /// Attempt on which the permanent failure occurred.
        attempt: usize,
        /// The permanent error.
        error: RemoteError,
    },
}

impl RetryFailure {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::NonRetryable { attempt, .. } => *attempt,
        }
    }

    /// The last remote error observed.
    pub fn remote(&self) -> &RemoteError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable { error, .. } => error,
        }
    }

    /// True when the retry budget ran out, as opposed to a permanent failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    fn transient() -> RemoteError {
        RemoteError::Transient {
            service: "test",
            message: "connection reset".into(),
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let value = instant(3)
            .run("flaky", |_| {
                calls += 1;
                if calls < 3 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut calls = 0;
        let err = instant(4)
            .run("down", |_| -> Result<(), _> {
                calls += 1;
                Err(transient())
            })
            .expect_err("never succeeds");
        assert_eq!(calls, 4);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 4);
    }

    #[test]
    fn permanent_errors_stop_immediately() {
        let mut calls = 0;
        let err = instant(5)
            .run("rejected", |_| -> Result<(), _> {
                calls += 1;
                Err(RemoteError::Rejected {
                    service: "test",
                    status: 400,
                    body: "bad input".into(),
                })
            })
            .expect_err("rejected");
        assert_eq!(calls, 1);
        assert!(!err.is_exhausted());
        assert_eq!(err.attempts(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(4));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(5), Duration::from_secs(4));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
    }
}
