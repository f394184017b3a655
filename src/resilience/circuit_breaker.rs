//! Circuit Breaker Pattern Implementation
//!
//! The circuit breaker watches the outcome of calls to one dependency and,
//! once it looks unhealthy, refuses calls for a cooldown period so the
//! dependency gets time to recover.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐
//! │ Closed  │ ◄──────────────────┐
//! │ (Normal)│                    │
//! └────┬────┘                    │
//!      │ failure_threshold       │ half_open_trial_limit
//!      │ consecutive failures    │ successes
//!      ▼                         │
//! ┌─────────┐  open_timeout  ┌───┴───────┐
//! │  Open   │───────────────►│ HalfOpen  │
//! │(Failing)│                │ (Testing) │
//! └─────────┘◄───────────────└───────────┘
//!                any failure
//! ```
//!
//! # Failure window
//!
//! Failures are counted consecutively; a success while closed starts the
//! count over. With `failure_window` set, a streak also starts over when a
//! failure arrives more than `failure_window` after the streak's first
//! failure, so sparse failures never trip the breaker.
//!
//! # Example
//!
//! ```rust
//! use lighter_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 10,
//!     open_timeout: Duration::from_secs(120),
//!     ..CircuitBreakerConfig::default()
//! };
//! let cb = CircuitBreaker::with_config("payment-service", config);
//!
//! if cb.allow() {
//!     match do_request().await {
//!         Ok(_) => cb.record_success(),
//!         Err(_) => cb.record_failure(),
//!     }
//! }
//! # }
//! # async fn do_request() -> Result<(), std::io::Error> { Ok(()) }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::events::{EventSink, RejectionReason, ResilienceEvent, TracingSink};
use super::ResilienceError;
use crate::clock::{Clock, SystemClock};
use crate::config;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until the open timeout expires
    Open,
    /// Testing state, allowing a limited number of trial requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Lifetime totals, independent of the current window
#[derive(Debug, Default)]
struct CircuitBreakerStats {
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejected: AtomicU64,
}

impl CircuitBreakerStats {
    fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before the next call is let through as a trial
    pub open_timeout: Duration,
    /// Maximum span of one failure streak, `None` for unbounded
    pub failure_window: Option<Duration>,
    /// Trial calls admitted while half-open, and successes needed to close
    pub half_open_trial_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            failure_window: None,
            half_open_trial_limit: 1,
        }
    }
}

impl From<&config::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(config: &config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_secs(config.open_timeout),
            failure_window: (config.failure_window > 0)
                .then(|| Duration::from_secs(config.failure_window)),
            half_open_trial_limit: config.half_open_trial_limit.max(1),
        }
    }
}

/// Mutable state guarded by the breaker's mutex
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    trial_count: u32,
    streak_started_at: Option<Instant>,
    last_transition_at: Instant,
}

impl BreakerCore {
    fn reset_counters(&mut self) {
        self.failure_count = 0;
        self.success_count = 0;
        self.trial_count = 0;
        self.streak_started_at = None;
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub trial_count: u32,
    pub last_transition_at: Instant,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
}

/// Circuit breaker for a single dependency
///
/// # Thread Safety
///
/// State and window counters live behind one mutex and every transition
/// happens while holding it, so concurrent callers always observe a single
/// sequence of transitions. Lifetime totals are plain atomics. Cloning
/// yields another handle to the same breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    /// Dependency name, used in events and errors
    name: String,
    core: Arc<Mutex<BreakerCore>>,
    stats: Arc<CircuitBreakerStats>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_parts(name, config, SystemClock::shared(), TracingSink::shared())
    }

    /// Create a breaker on an explicit clock and event sink
    pub fn with_parts(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            half_open_trial_limit: config.half_open_trial_limit.max(1),
            ..config
        };
        let core = BreakerCore {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            trial_count: 0,
            streak_started_at: None,
            last_transition_at: clock.now(),
        };

        Self {
            name: name.into(),
            core: Arc::new(Mutex::new(core)),
            stats: Arc::new(CircuitBreakerStats::default()),
            config,
            clock,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the clock under the lock, never earlier than the last transition
    fn now(&self, core: &BreakerCore) -> Instant {
        self.clock.now().max(core.last_transition_at)
    }

    /// Move to `to`, reset window counters and publish the transition
    ///
    /// Called with the lock held so events come out in transition order.
    fn transition(&self, core: &mut BreakerCore, to: CircuitState, now: Instant) {
        let from = core.state;
        core.state = to;
        core.last_transition_at = now;
        core.reset_counters();

        self.events.emit(&ResilienceEvent::StateTransition {
            dependency: self.name.clone(),
            from,
            to,
            at: now,
        });
    }

    /// Whether a call may proceed now
    ///
    /// In half-open every `true` consumes one trial slot. The first caller
    /// past the open timeout performs the Open → HalfOpen transition and
    /// takes the first slot; concurrent callers see the transition already
    /// made and compete for the remaining slots.
    pub fn allow(&self) -> bool {
        let mut core = self.lock();
        let now = self.now(&core);

        let permitted = match core.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = now.saturating_duration_since(core.last_transition_at);
                if elapsed >= self.config.open_timeout {
                    self.transition(&mut core, CircuitState::HalfOpen, now);
                    core.trial_count = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if core.trial_count < self.config.half_open_trial_limit {
                    core.trial_count += 1;
                    true
                } else if now.saturating_duration_since(core.last_transition_at)
                    >= self.config.open_timeout
                {
                    // Trials were handed out but never reported back.
                    tracing::debug!(
                        circuit_breaker = %self.name,
                        trials = core.trial_count,
                        "Restarting stale half-open trial window"
                    );
                    core.reset_counters();
                    core.last_transition_at = now;
                    core.trial_count = 1;
                    true
                } else {
                    false
                }
            }
        };

        if !permitted {
            self.stats.record_rejection();
            self.events.emit(&ResilienceEvent::Rejected {
                dependency: self.name.clone(),
                reason: RejectionReason::CircuitOpen,
                at: now,
            });
        }

        permitted
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut core = self.lock();
        let now = self.now(&core);
        self.stats.record_success();

        match core.state {
            CircuitState::Closed => {
                core.failure_count = 0;
                core.streak_started_at = None;
            }
            CircuitState::HalfOpen => {
                core.success_count += 1;
                if core.success_count >= self.config.half_open_trial_limit {
                    self.transition(&mut core, CircuitState::Closed, now);
                }
            }
            // Late result from a call admitted before the breaker opened.
            CircuitState::Open => {}
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let mut core = self.lock();
        let now = self.now(&core);
        self.stats.record_failure();

        match core.state {
            CircuitState::Closed => {
                if let (Some(window), Some(started)) =
                    (self.config.failure_window, core.streak_started_at)
                {
                    if now.saturating_duration_since(started) > window {
                        core.failure_count = 0;
                        core.streak_started_at = None;
                    }
                }
                if core.failure_count == 0 {
                    core.streak_started_at = Some(now);
                }
                core.failure_count += 1;

                if core.failure_count >= self.config.failure_threshold {
                    self.transition(&mut core, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut core, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation protected by the circuit breaker
    ///
    /// The future is only polled when the breaker admits the call. Its
    /// error comes back as `Terminal`: this wrapper never retries.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(ResilienceError::CircuitOpen {
                dependency: self.name.clone(),
            });
        }

        match f.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ResilienceError::Terminal {
                    attempt: 1,
                    source: err,
                })
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get the circuit breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.lock();
        BreakerSnapshot {
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            trial_count: core.trial_count,
            last_transition_at: core.last_transition_at,
            total_calls: self.total_calls(),
            total_failures: self.total_failures(),
            total_rejected: self.total_rejected(),
        }
    }

    /// Get total number of reported outcomes
    pub fn total_calls(&self) -> u64 {
        self.stats.total_calls.load(Ordering::Relaxed)
    }

    /// Get total number of reported failures
    pub fn total_failures(&self) -> u64 {
        self.stats.total_failures.load(Ordering::Relaxed)
    }

    /// Get total number of calls refused by `allow`
    pub fn total_rejected(&self) -> u64 {
        self.stats.total_rejected.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            return 0.0;
        }
        self.total_failures() as f64 / total as f64
    }

    /// Force the breaker closed
    ///
    /// For administrative use. Lifetime totals are kept.
    pub fn reset(&self) {
        let mut core = self.lock();
        let now = self.now(&core);
        if core.state == CircuitState::Closed {
            core.reset_counters();
        } else {
            self.transition(&mut core, CircuitState::Closed, now);
        }
        tracing::info!(
            circuit_breaker = %self.name,
            "Circuit breaker manually reset to Closed"
        );
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .field("success_count", &snapshot.success_count)
            .field("trial_count", &snapshot.trial_count)
            .field("total_calls", &snapshot.total_calls)
            .field("total_failures", &snapshot.total_failures)
            .field("config", &self.config)
            .finish()
    }
}
