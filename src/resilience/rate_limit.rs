//! Token bucket admission gate for calls to one dependency.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::events::{EventSink, RejectionReason, ResilienceEvent, TracingSink};
use crate::clock::{Clock, SystemClock};
use crate::config;

/// Token bucket parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Maximum tokens held (burst allowance)
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 50.0,
        }
    }
}

impl From<&config::RateLimitConfig> for TokenBucketConfig {
    fn from(config: &config::RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_rate: config.refill_rate,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill_at: Instant,
}

/// Counters for a bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub total_requests: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    /// Calculate rejection rate (0.0 to 1.0)
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }
}

/// Token bucket rate limiter
///
/// Starts full. Refill and consumption happen in the same critical section,
/// so concurrent callers can neither spend a token twice nor lose a refill.
#[derive(Clone)]
pub struct TokenBucket {
    name: String,
    config: TokenBucketConfig,
    state: Arc<Mutex<BucketState>>,
    total_requests: Arc<AtomicU64>,
    total_rejected: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl TokenBucket {
    pub fn new(name: impl Into<String>, config: TokenBucketConfig) -> Self {
        Self::with_parts(name, config, SystemClock::shared(), TracingSink::shared())
    }

    pub fn with_parts(
        name: impl Into<String>,
        config: TokenBucketConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = TokenBucketConfig {
            capacity: config.capacity,
            refill_rate: if config.refill_rate.is_finite() {
                config.refill_rate.max(0.0)
            } else {
                0.0
            },
        };
        let state = BucketState {
            available: config.capacity as f64,
            last_refill_at: clock.now(),
        };

        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(state)),
            total_requests: Arc::new(AtomicU64::new(0)),
            total_rejected: Arc::new(AtomicU64::new(0)),
            clock,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add the tokens earned since the last refill, capped at capacity
    ///
    /// Reads the clock under the caller's lock. `last_refill_at` never moves
    /// backwards, so a span of time is only ever credited once.
    fn refill(&self, state: &mut BucketState) -> Instant {
        let now = self.clock.now().max(state.last_refill_at);
        let elapsed = now.duration_since(state.last_refill_at);
        let earned = elapsed.as_secs_f64() * self.config.refill_rate;
        state.available = (state.available + earned).min(self.config.capacity as f64);
        state.last_refill_at = now;
        now
    }

    /// Take `cost` tokens if they are all available
    ///
    /// A rejection leaves the bucket untouched apart from the refill.
    pub fn try_acquire(&self, cost: u32) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let (admitted, now) = {
            let mut state = self.lock();
            let now = self.refill(&mut state);

            let cost = cost as f64;
            if state.available >= cost {
                state.available -= cost;
                (true, now)
            } else {
                (false, now)
            }
        };

        if !admitted {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            self.events.emit(&ResilienceEvent::Rejected {
                dependency: self.name.clone(),
                reason: RejectionReason::RateLimited,
                at: now,
            });
        }

        admitted
    }

    /// Current token count, after refilling
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.available
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Get current statistics
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            available_tokens: self.available_tokens(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("available", &self.lock().available)
            .finish()
    }
}
