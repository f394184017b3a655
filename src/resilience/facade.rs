//! Single entry point composing the resilience stages.
//!
//! Per call: token bucket admission (once) → breaker admission (before
//! every attempt) → retry loop around the operation → every completed
//! attempt reported to the breaker. A rejected call never reaches the
//! operation and never counts as a breaker failure.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::registry::{Dependency, DependencyRegistry};
use super::retry::{AttemptOutcome, RetryPolicy};
use super::ResilienceError;

/// Runs operations against named dependencies
#[derive(Debug, Clone)]
pub struct Resilience {
    registry: DependencyRegistry,
}

impl Resilience {
    pub fn new(registry: DependencyRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    /// Run `operation` against the dependency called `name`
    ///
    /// The dependency is built from config the first time it is named.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        operation: F,
        is_retryable: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let dependency = self.registry.get_or_create(name);
        let token = CancellationToken::new();
        self.protect_with_cancel(&dependency, policy, operation, is_retryable, &token)
            .await
    }

    /// [`run`](Self::run), giving up once `cancel` fires
    pub async fn run_with_cancel<T, E, F, Fut, P>(
        &self,
        name: &str,
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
        let dependency = self.registry.get_or_create(name);
        self.protect_with_cancel(&dependency, policy, operation, is_retryable, cancel)
            .await
    }

    /// [`run`](Self::run), bounded by `deadline` across all attempts and waits
    ///
    /// Expiry is reported as `Cancelled`.
    pub async fn run_with_deadline<T, E, F, Fut, P>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        operation: F,
        is_retryable: P,
        deadline: Duration,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let dependency = self.registry.get_or_create(name);
        let token = CancellationToken::new();
        let clock = self.registry.clock();

        let work =
            self.protect_with_cancel(&dependency, policy, operation, is_retryable, &token);
        tokio::pin!(work);

        tokio::select! {
            result = &mut work => return result,
            _ = clock.sleep(deadline) => {
                tracing::debug!(
                    dependency = %dependency.name(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Deadline expired"
                );
                token.cancel();
            }
        }

        // Let the loop observe the cancellation so it reports its attempts.
        work.await
    }

    /// Run `operation` against a dependency the caller already holds
    pub async fn protect<T, E, F, Fut, P>(
        &self,
        dependency: &Dependency,
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
        self.protect_with_cancel(dependency, policy, operation, is_retryable, &token)
            .await
    }

    /// [`protect`](Self::protect), giving up once `cancel` fires
    pub async fn protect_with_cancel<T, E, F, Fut, P>(
        &self,
        dependency: &Dependency,
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
        if let Some(limiter) = dependency.limiter() {
            if !limiter.try_acquire(1) {
                return Err(ResilienceError::RateLimited {
                    dependency: dependency.name().to_string(),
                });
            }
        }

        let breaker = dependency.breaker();
        let gate = |_attempt: u32| match breaker {
            Some(breaker) if !breaker.allow() => Err(ResilienceError::CircuitOpen {
                dependency: dependency.name().to_string(),
            }),
            _ => Ok(()),
        };
        let report = |_attempt: u32, outcome: AttemptOutcome| {
            if let Some(breaker) = breaker {
                match outcome {
                    AttemptOutcome::Success => breaker.record_success(),
                    AttemptOutcome::RetryableFailure
                    | AttemptOutcome::TerminalFailure
                    | AttemptOutcome::TimedOut => breaker.record_failure(),
                }
            }
        };

        dependency
            .executor()
            .run(policy, operation, is_retryable, cancel, gate, report)
            .await
    }
}
