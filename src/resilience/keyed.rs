//! Per-client throttling for inbound requests.
//!
//! Each [`RequestClass`] has one keyed GCRA limiter from `governor`, backed
//! by its DashMap state store. The key is whatever identifies a client to
//! the caller (IP address, user id, `ip:action`).
//!
//! Keys accumulate as new clients show up. [`KeyedRateLimiter::retain_recent`]
//! drops every key whose quota has fully replenished, which is state
//! indistinguishable from a key never seen; [`KeyedRateLimiter::spawn_cleanup`]
//! runs it on an interval.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::KeyedRateLimitConfig;

type ClassLimiter<C> = RateLimiter<
    String,
    DashMapStateStore<String>,
    C,
    NoOpMiddleware<<C as governor::clock::Clock>::Instant>,
>;

/// Which quota a request draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// GET and other safe methods
    Read,
    /// PATCH, POST, DELETE
    Write,
}

impl RequestClass {
    /// Classify an HTTP method name
    pub fn from_method(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET")
            || method.eq_ignore_ascii_case("HEAD")
            || method.eq_ignore_ascii_case("OPTIONS")
        {
            RequestClass::Read
        } else {
            RequestClass::Write
        }
    }
}

/// Keyed rate limiter with thread-safe tracking
///
/// Generic over the `governor` clock so tests can drive replenishment.
pub struct KeyedRateLimiter<C = DefaultClock>
where
    C: governor::clock::Clock,
{
    reads: Arc<ClassLimiter<C>>,
    writes: Arc<ClassLimiter<C>>,
    clock: C,
    config: KeyedRateLimitConfig,
}

impl<C: governor::clock::Clock> Clone for KeyedRateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            reads: self.reads.clone(),
            writes: self.writes.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl KeyedRateLimiter {
    pub fn new(config: KeyedRateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: governor::clock::Clock> KeyedRateLimiter<C> {
    pub fn with_clock(config: KeyedRateLimitConfig, clock: C) -> Self {
        let reads = RateLimiter::dashmap_with_clock(quota(&config, RequestClass::Read), &clock);
        let writes = RateLimiter::dashmap_with_clock(quota(&config, RequestClass::Write), &clock);

        Self {
            reads: Arc::new(reads),
            writes: Arc::new(writes),
            clock,
            config,
        }
    }

    fn limiter(&self, class: RequestClass) -> &ClassLimiter<C> {
        match class {
            RequestClass::Read => &self.reads,
            RequestClass::Write => &self.writes,
        }
    }

    /// Check whether `key` may make another request of `class`
    ///
    /// Returns the time until the next request would be admitted when the
    /// quota is used up.
    #[tracing::instrument(skip(self))]
    pub fn check(&self, key: &str, class: RequestClass) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.limiter(class).check_key(&key.to_string()) {
            Ok(_) => {
                tracing::debug!(key = %key, ?class, "Request allowed");
                Ok(())
            }
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(self.clock.now());
                tracing::warn!(
                    key = %key,
                    ?class,
                    retry_after = ?wait_time,
                    "Rate limit exceeded"
                );
                Err(wait_time)
            }
        }
    }

    /// Number of tracked `(class, key)` pairs
    pub fn tracked(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    /// Drop keys whose quota has fully replenished
    pub fn retain_recent(&self) {
        let before = self.tracked();
        self.reads.retain_recent();
        self.writes.retain_recent();
        self.reads.shrink_to_fit();
        self.writes.shrink_to_fit();
        tracing::debug!(
            before,
            after = self.tracked(),
            "Reclaimed idle rate limit keys"
        );
    }

    /// Get the current configuration
    pub fn config(&self) -> &KeyedRateLimitConfig {
        &self.config
    }
}

impl<C> KeyedRateLimiter<C>
where
    C: governor::clock::Clock + Send + Sync + 'static,
    C::Instant: Send + Sync,
{
    /// Run [`retain_recent`](Self::retain_recent) every `every` on the
    /// current tokio runtime
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.retain_recent();
            }
        })
    }
}

impl<C: governor::clock::Clock> std::fmt::Debug for KeyedRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter")
            .field("config", &self.config)
            .field("tracked", &self.tracked())
            .finish()
    }
}

/// Burst equals the request count; the quota replenishes over `window`
fn quota(config: &KeyedRateLimitConfig, class: RequestClass) -> Quota {
    let requests = match class {
        RequestClass::Read => config.read_requests,
        RequestClass::Write => config.write_requests,
    };
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs(config.window) / burst.get();

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
