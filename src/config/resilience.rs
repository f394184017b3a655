use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ConfigError, Validate, WithDefaults};

/// Resilience configuration
///
/// The top-level sections apply to every protected dependency. Entries in
/// `dependencies` replace whole sections for a single dependency name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(Default)]
pub struct ResilienceConfig {
    /// Circuit breaker configuration
    #[serde(default = "CircuitBreakerConfig::default")]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry configuration
    #[serde(default = "RetryConfig::default")]
    pub retry: RetryConfig,
    /// Outbound token bucket configuration
    #[serde(default = "RateLimitConfig::default")]
    pub rate_limit: RateLimitConfig,
    /// Per-dependency overrides keyed by dependency name
    #[serde(default)]
    pub dependencies: HashMap<String, DependencyOverride>,
}

/// Section replacements for one dependency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyOverride {
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    /// Consecutive failures that open the circuit
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before probing
    #[serde(default = "default_circuit_breaker_open_timeout")]
    pub open_timeout: u64,
    /// Seconds a failure streak may span before it starts over (0 = unbounded)
    #[serde(default)]
    pub failure_window: u64,
    /// Trial calls admitted in half-open, and successes needed to close
    #[serde(default = "default_circuit_breaker_half_open_trial_limit")]
    pub half_open_trial_limit: u32,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Enable retry
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    /// Maximum number of attempts, first call included
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Backoff strategy
    #[serde(default = "default_retry_backoff")]
    pub backoff: RetryBackoff,
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub base_delay: u64,
    /// Minimum delay in milliseconds
    #[serde(default)]
    pub min_delay: u64,
    /// Maximum delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: u64,
    /// Multiplier for exponential backoff
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    /// Random spread applied to each delay, 0.0 to 1.0
    #[serde(default = "default_retry_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Time limit for a single attempt in milliseconds (0 = none)
    #[serde(default)]
    pub attempt_timeout: u64,
    /// Whether an attempt that hits `attempt_timeout` is retried
    #[serde(default = "default_retry_on_timeout")]
    pub retry_on_timeout: bool,
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Exponential backoff (delay *= multiplier)
    Exponential,
    /// Linear backoff (delay += base_delay)
    Linear,
    /// Constant backoff (delay = base_delay)
    Constant,
}

/// Token bucket configuration for calls to a dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Bucket size (burst allowance)
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: u32,
    /// Tokens added per second
    #[serde(default = "default_rate_limit_refill_rate")]
    pub refill_rate: f64,
}

// Default functions for CircuitBreakerConfig
fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_open_timeout() -> u64 {
    30
}

fn default_circuit_breaker_half_open_trial_limit() -> u32 {
    1
}

// Default functions for RetryConfig
fn default_retry_enabled() -> bool {
    true
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> RetryBackoff {
    RetryBackoff::Exponential
}

fn default_retry_base_delay() -> u64 {
    100 // milliseconds
}

fn default_retry_max_delay() -> u64 {
    10000 // milliseconds
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter_ratio() -> f64 {
    0.1
}

fn default_retry_on_timeout() -> bool {
    true
}

// Default functions for RateLimitConfig
fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_capacity() -> u32 {
    100
}

fn default_rate_limit_refill_rate() -> f64 {
    50.0
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_circuit_breaker_failure_threshold(),
            open_timeout: default_circuit_breaker_open_timeout(),
            failure_window: 0,
            half_open_trial_limit: default_circuit_breaker_half_open_trial_limit(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_retry_max_attempts(),
            backoff: default_retry_backoff(),
            base_delay: default_retry_base_delay(),
            min_delay: 0,
            max_delay: default_retry_max_delay(),
            multiplier: default_retry_multiplier(),
            jitter_ratio: default_retry_jitter_ratio(),
            attempt_timeout: 0,
            retry_on_timeout: default_retry_on_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            capacity: default_rate_limit_capacity(),
            refill_rate: default_rate_limit_refill_rate(),
        }
    }
}

impl ResilienceConfig {
    /// Breaker section in effect for `dependency`
    pub fn circuit_breaker_for(&self, dependency: &str) -> &CircuitBreakerConfig {
        self.dependencies
            .get(dependency)
            .and_then(|o| o.circuit_breaker.as_ref())
            .unwrap_or(&self.circuit_breaker)
    }

    /// Retry section in effect for `dependency`
    pub fn retry_for(&self, dependency: &str) -> &RetryConfig {
        self.dependencies
            .get(dependency)
            .and_then(|o| o.retry.as_ref())
            .unwrap_or(&self.retry)
    }

    /// Token bucket section in effect for `dependency`
    pub fn rate_limit_for(&self, dependency: &str) -> &RateLimitConfig {
        self.dependencies
            .get(dependency)
            .and_then(|o| o.rate_limit.as_ref())
            .unwrap_or(&self.rate_limit)
    }
}

impl Validate for ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.rate_limit.validate()?;
        for (name, dependency) in &self.dependencies {
            if name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "resilience.dependencies keys cannot be empty".to_string(),
                ));
            }
            dependency.validate().map_err(|e| match e {
                ConfigError::ValidationError(msg) => ConfigError::ValidationError(format!(
                    "dependency '{}': {}",
                    name, msg
                )),
                other => other,
            })?;
        }
        Ok(())
    }
}

impl Validate for DependencyOverride {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(cb) = &self.circuit_breaker {
            cb.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

impl Validate for CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError("resilience.circuit_breaker.failure_threshold must be > 0 when circuit breaker is enabled".to_string()));
        }
        if self.enabled && self.open_timeout == 0 {
            return Err(ConfigError::ValidationError("resilience.circuit_breaker.open_timeout must be > 0 when circuit breaker is enabled".to_string()));
        }
        if self.enabled && self.half_open_trial_limit == 0 {
            return Err(ConfigError::ValidationError("resilience.circuit_breaker.half_open_trial_limit must be > 0 when circuit breaker is enabled".to_string()));
        }
        Ok(())
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.max_attempts == 0 {
            return Err(ConfigError::ValidationError("resilience.retry.max_attempts must be > 0 when retry is enabled".to_string()));
        }
        if self.enabled && self.base_delay > self.max_delay {
            return Err(ConfigError::ValidationError("resilience.retry.base_delay must be <= max_delay".to_string()));
        }
        if self.enabled && self.min_delay > self.max_delay {
            return Err(ConfigError::ValidationError("resilience.retry.min_delay must be <= max_delay".to_string()));
        }
        if self.enabled && !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ConfigError::ValidationError("resilience.retry.multiplier must be >= 1.0 when retry is enabled".to_string()));
        }
        if self.enabled && !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::ValidationError("resilience.retry.jitter_ratio must be between 0.0 and 1.0".to_string()));
        }
        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.capacity == 0 {
            return Err(ConfigError::ValidationError("resilience.rate_limit.capacity must be > 0 when rate limiting is enabled".to_string()));
        }
        if self.enabled && !(self.refill_rate > 0.0 && self.refill_rate.is_finite()) {
            return Err(ConfigError::ValidationError("resilience.rate_limit.refill_rate must be > 0.0 when rate limiting is enabled".to_string()));
        }
        Ok(())
    }
}

impl WithDefaults for ResilienceConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for CircuitBreakerConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for RetryConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for RateLimitConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
