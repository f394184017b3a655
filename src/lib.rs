pub mod clock;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod resilience;

// Re-export commonly used types for convenience
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::{AppConfig, ConfigError};
pub use self::metrics::ResilienceMetrics;
pub use self::resilience::{
    CircuitBreaker, CircuitState, Dependency, DependencyRegistry, KeyedRateLimiter, Resilience,
    ResilienceError, ResilienceLayer, RetryPolicy, TokenBucket,
};
