//! Time source for the resilience layer.
//!
//! Every component that reads the time or waits goes through a [`Clock`], so
//! tests can drive breaker timeouts, token refills and backoff waits without
//! sleeping for real.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time plus a non-blocking sleep
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`
    ///
    /// Must only suspend the caller, never the executor thread.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant::now` and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle, the form components expect
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

/// Deterministic clock for tests
///
/// Time only moves when [`ManualClock::advance`] is called or when somebody
/// sleeps on it: `sleep(d)` yields once, then jumps the clock forward by `d`
/// and records the request.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.offset += duration;
    }

    /// Total time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offset
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.offset += duration;
        state.sleeps.push(duration);
    }
}

/// Clock replaying a fixed list of readings, one per `now()` call
///
/// Lets tests stage interleavings where a caller's reading lands after a
/// later one. Once the script runs out the last reading repeats.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ScriptedClock {
    origin: Instant,
    reads: Mutex<std::collections::VecDeque<Duration>>,
    last: Mutex<Duration>,
}

#[cfg(test)]
impl ScriptedClock {
    /// Readings are offsets in seconds from a common origin
    pub(crate) fn new(reads: &[f64]) -> Self {
        Self {
            origin: Instant::now(),
            reads: Mutex::new(reads.iter().map(|s| Duration::from_secs_f64(*s)).collect()),
            last: Mutex::new(Duration::ZERO),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ScriptedClock {
    fn now(&self) -> Instant {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.reads.lock().unwrap().pop_front() {
            *last = next;
        }
        self.origin + *last
    }

    async fn sleep(&self, _duration: Duration) {}
}
