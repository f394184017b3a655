//! Retry logic with backoff for transient failures.
//!
//! The attempt loop is bounded by `max_attempts` and cancellable at every
//! suspension point. Whether an error is worth retrying is decided by a
//! predicate supplied by the caller. An optional per-attempt time limit
//! turns a hung attempt into a failure the policy decides whether to retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffPolicy;
use super::events::{EventSink, ResilienceEvent, TracingSink};
use super::ResilienceError;
use crate::clock::{Clock, SystemClock};
use crate::config;

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on attempts, first call included; never below 1
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Time limit for a single attempt, `None` for unbounded
    pub attempt_timeout: Option<Duration>,
    /// Whether an attempt that ran out of time may be retried
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffPolicy::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            attempt_timeout: None,
            retry_on_timeout: true,
        }
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self::new(1, BackoffPolicy::default())
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_retry_on_timeout(mut self, retry_on_timeout: bool) -> Self {
        self.retry_on_timeout = retry_on_timeout;
        self
    }
}

impl From<&config::RetryConfig> for RetryPolicy {
    fn from(config: &config::RetryConfig) -> Self {
        let max_attempts = if config.enabled { config.max_attempts } else { 1 };
        let mut policy = Self::new(max_attempts, BackoffPolicy::from(config))
            .with_retry_on_timeout(config.retry_on_timeout);
        if config.attempt_timeout > 0 {
            policy = policy.with_attempt_timeout(Duration::from_millis(config.attempt_timeout));
        }
        policy
    }
}

/// Result of a single attempt, as seen by observers of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Failed with an error the predicate accepted for retry
    RetryableFailure,
    /// Failed with an error the predicate rejected
    TerminalFailure,
    /// Ran past the policy's per-attempt time limit
    TimedOut,
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    /// Dependency label attached to events
    name: String,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl RetryExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parts(name, SystemClock::shared(), TracingSink::shared())
    }

    pub fn with_parts(
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name: name.into(),
            clock,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke `operation` until it succeeds, fails terminally, or the policy
    /// runs out of attempts
    ///
    /// `operation` receives the 1-indexed attempt number.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        policy: &RetryPolicy,
        operation: F,
        is_retryable: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let token = CancellationToken::new();
        self.execute_with_cancel(policy, operation, is_retryable, &token)
            .await
    }

    /// Like [`execute`](Self::execute), but gives up as soon as `cancel`
    /// fires, whether an attempt is running or a backoff wait is pending
    pub async fn execute_with_cancel<T, E, F, Fut, P>(
        &self,
        policy: &RetryPolicy,
        operation: F,
        is_retryable: P,
        cancel: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.run(policy, operation, is_retryable, cancel, |_| Ok(()), |_, _| {})
            .await
    }

    /// The attempt loop
    ///
    /// `gate` runs before every attempt and may refuse it; `report` sees the
    /// outcome of every completed attempt. Attempts abandoned through
    /// cancellation are not reported.
    pub(crate) async fn run<T, E, F, Fut, P, G, R>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
        is_retryable: P,
        cancel: &CancellationToken,
        mut gate: G,
        mut report: R,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        G: FnMut(u32) -> Result<(), ResilienceError<E>>,
        R: FnMut(u32, AttemptOutcome),
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled {
                    attempts: attempt - 1,
                });
            }
            gate(attempt)?;

            let time_limit = async {
                match policy.attempt_timeout {
                    Some(limit) => self.clock.sleep(limit).await,
                    None => std::future::pending().await,
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(dependency = %self.name, attempt, "Attempt cancelled");
                    return Err(ResilienceError::Cancelled { attempts: attempt });
                }
                result = operation(attempt) => Some(result),
                _ = time_limit => None,
            };

            // `None` marks an attempt abandoned at the time limit.
            let error = match result {
                Some(Ok(value)) => {
                    report(attempt, AttemptOutcome::Success);
                    return Ok(value);
                }
                Some(Err(error)) => {
                    if !is_retryable(&error) {
                        report(attempt, AttemptOutcome::TerminalFailure);
                        tracing::debug!(dependency = %self.name, attempt, "Terminal failure, not retrying");
                        return Err(ResilienceError::Terminal {
                            attempt,
                            source: error,
                        });
                    }
                    report(attempt, AttemptOutcome::RetryableFailure);
                    Some(error)
                }
                None => {
                    report(attempt, AttemptOutcome::TimedOut);
                    tracing::debug!(dependency = %self.name, attempt, "Attempt timed out");
                    if !policy.retry_on_timeout {
                        return Err(ResilienceError::TimedOut { attempts: attempt });
                    }
                    None
                }
            };

            if attempt >= max_attempts {
                self.events.emit(&ResilienceEvent::RetriesExhausted {
                    dependency: self.name.clone(),
                    attempts: attempt,
                });
                return Err(match error {
                    Some(source) => ResilienceError::RetriesExhausted {
                        attempts: attempt,
                        source,
                    },
                    None => ResilienceError::TimedOut { attempts: attempt },
                });
            }

            let delay = policy.backoff.compute_delay(attempt);
            self.events.emit(&ResilienceEvent::RetryScheduled {
                dependency: self.name.clone(),
                attempt,
                delay,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(dependency = %self.name, attempt, "Backoff wait cancelled");
                    return Err(ResilienceError::Cancelled { attempts: attempt });
                }
                _ = self.clock.sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
