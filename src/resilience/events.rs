//! Observability hook for the resilience layer.
//!
//! Breakers, buckets and the retry loop describe what they do as
//! [`ResilienceEvent`]s handed to an [`EventSink`]. The default
//! [`TracingSink`] turns them into log lines and metrics.

use std::fmt;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::CircuitState;
use crate::metrics;

/// Why a call was refused before reaching the dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    RateLimited,
    CircuitOpen,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::RateLimited => "rate_limited",
            RejectionReason::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something worth reporting happened to a protected dependency
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// Breaker moved between states
    StateTransition {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
        at: Instant,
    },
    /// Call refused before invoking the operation
    Rejected {
        dependency: String,
        reason: RejectionReason,
        at: Instant,
    },
    /// Attempt failed with a retryable error and another one is scheduled
    RetryScheduled {
        dependency: String,
        attempt: u32,
        delay: Duration,
    },
    /// Last attempt failed with a retryable error
    RetriesExhausted { dependency: String, attempts: u32 },
}

impl ResilienceEvent {
    pub fn dependency(&self) -> &str {
        match self {
            ResilienceEvent::StateTransition { dependency, .. }
            | ResilienceEvent::Rejected { dependency, .. }
            | ResilienceEvent::RetryScheduled { dependency, .. }
            | ResilienceEvent::RetriesExhausted { dependency, .. } => dependency,
        }
    }
}

/// Receiver for resilience events
///
/// Called inline from the component that produced the event, so
/// implementations must be quick and must not call back into it.
pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: &ResilienceEvent);
}

/// Logs events with `tracing` and records them as metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> Arc<dyn EventSink> {
        Arc::new(TracingSink)
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::StateTransition {
                dependency,
                from,
                to,
                ..
            } => {
                if *to == CircuitState::Open {
                    tracing::warn!(
                        dependency = %dependency,
                        from = %from,
                        to = %to,
                        "Circuit breaker opened"
                    );
                } else {
                    tracing::info!(
                        dependency = %dependency,
                        from = %from,
                        to = %to,
                        "Circuit breaker state changed"
                    );
                }
                metrics::record_transition(dependency, *from, *to);
            }
            ResilienceEvent::Rejected {
                dependency, reason, ..
            } => {
                tracing::warn!(dependency = %dependency, reason = %reason, "Call rejected");
                metrics::record_rejection(dependency, *reason);
            }
            ResilienceEvent::RetryScheduled {
                dependency,
                attempt,
                delay,
            } => {
                tracing::debug!(
                    dependency = %dependency,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                metrics::record_retry(dependency, *delay);
            }
            ResilienceEvent::RetriesExhausted {
                dependency,
                attempts,
            } => {
                tracing::warn!(dependency = %dependency, attempts = attempts, "Retries exhausted");
                metrics::record_exhausted(dependency);
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory, for assertions in tests
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ResilienceEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Breaker transitions seen so far as `(from, to)` pairs
    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ResilienceEvent::StateTransition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
