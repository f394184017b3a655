//! Per-dependency breaker and limiter ownership.

use dashmap::DashMap;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::events::{EventSink, TracingSink};
use super::rate_limit::{TokenBucket, TokenBucketConfig};
use super::retry::{RetryExecutor, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceConfig;

/// Everything that guards calls to one downstream dependency
///
/// Cloning is cheap; clones share the same breaker and bucket.
#[derive(Debug, Clone)]
pub struct Dependency {
    name: String,
    breaker: Option<CircuitBreaker>,
    limiter: Option<TokenBucket>,
    retry_policy: RetryPolicy,
    executor: RetryExecutor,
}

impl Dependency {
    /// A dependency with no breaker, no limiter and the default retry policy
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parts(name, SystemClock::shared(), TracingSink::shared())
    }

    pub fn with_parts(
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let name = name.into();
        Self {
            executor: RetryExecutor::with_parts(name.clone(), clock, events),
            name,
            breaker: None,
            limiter: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Build a dependency from the sections that apply to `name`
    ///
    /// Disabled sections leave the matching stage out.
    pub fn from_config(
        name: impl Into<String>,
        config: &ResilienceConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let name = name.into();
        let breaker_config = config.circuit_breaker_for(&name);
        let rate_limit_config = config.rate_limit_for(&name);

        let breaker = breaker_config.enabled.then(|| {
            CircuitBreaker::with_parts(
                name.clone(),
                CircuitBreakerConfig::from(breaker_config),
                clock.clone(),
                events.clone(),
            )
        });
        let limiter = rate_limit_config.enabled.then(|| {
            TokenBucket::with_parts(
                name.clone(),
                TokenBucketConfig::from(rate_limit_config),
                clock.clone(),
                events.clone(),
            )
        });
        let retry_policy = RetryPolicy::from(config.retry_for(&name));

        Self {
            executor: RetryExecutor::with_parts(name.clone(), clock, events),
            name,
            breaker,
            limiter,
            retry_policy,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_limiter(mut self, limiter: TokenBucket) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn limiter(&self) -> Option<&TokenBucket> {
        self.limiter.as_ref()
    }

    /// Retry policy configured for this dependency
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn executor(&self) -> &RetryExecutor {
        &self.executor
    }
}

/// Owns one [`Dependency`] per name
///
/// Constructed explicitly and handed to the facade; there is no global
/// instance.
#[derive(Debug, Clone)]
pub struct DependencyRegistry {
    dependencies: Arc<DashMap<String, Dependency>>,
    config: Arc<ResilienceConfig>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl DependencyRegistry {
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_parts(config, SystemClock::shared(), TracingSink::shared())
    }

    pub fn with_parts(
        config: ResilienceConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            dependencies: Arc::new(DashMap::new()),
            config: Arc::new(config),
            clock,
            events,
        }
    }

    /// Add or replace a dependency, returning the one it replaced
    pub fn register(&self, dependency: Dependency) -> Option<Dependency> {
        tracing::debug!(dependency = %dependency.name(), "Registering dependency");
        self.dependencies
            .insert(dependency.name().to_string(), dependency)
    }

    pub fn get(&self, name: &str) -> Option<Dependency> {
        self.dependencies.get(name).map(|entry| entry.value().clone())
    }

    /// Get the dependency for `name`, building it from config on first use
    pub fn get_or_create(&self, name: &str) -> Dependency {
        self.dependencies
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency = %name, "Creating dependency from config");
                Dependency::from_config(name, &self.config, self.clock.clone(), self.events.clone())
            })
            .clone()
    }

    pub fn remove(&self, name: &str) -> Option<Dependency> {
        self.dependencies.remove(name).map(|(_, dependency)| dependency)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dependencies
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}
