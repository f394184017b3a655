//! Resilience patterns for calls to unreliable dependencies
//!
//! # Available Patterns
//!
//! - **Circuit Breaker**: stops calling a failing dependency for a cooldown
//!   period so it gets time to recover.
//! - **Retry**: re-runs transient failures with exponential backoff and
//!   jitter, bounded and cancellable.
//! - **Token bucket**: caps the call rate to one dependency.
//! - **Keyed limiter**: per-client quotas for inbound requests.
//!
//! [`Resilience`] composes the first three per dependency; [`ResilienceLayer`]
//! exposes the same pipeline as tower middleware.
//!
//! # Example
//!
//! ```rust
//! use lighter_resilience::config::ResilienceConfig;
//! use lighter_resilience::resilience::{DependencyRegistry, Resilience, RetryPolicy};
//!
//! # async fn example() {
//! let resilience = Resilience::new(DependencyRegistry::new(ResilienceConfig::default()));
//!
//! let result = resilience
//!     .run(
//!         "payment-api",
//!         &RetryPolicy::default(),
//!         |_attempt| async { Ok::<_, std::io::Error>(42) },
//!         |e: &std::io::Error| e.kind() == std::io::ErrorKind::TimedOut,
//!     )
//!     .await;
//! assert_eq!(result.unwrap(), 42);
//! # }
//! ```

mod backoff;
mod circuit_breaker;
mod error;
mod events;
mod facade;
mod keyed;
mod layer;
mod rate_limit;
mod registry;
mod retry;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ResilienceError;
pub use events::{EventSink, MemorySink, NullSink, RejectionReason, ResilienceEvent, TracingSink};
pub use facade::Resilience;
pub use keyed::{KeyedRateLimiter, RequestClass};
pub use layer::{ResilienceLayer, ResilienceService};
pub use rate_limit::{RateLimitStats, TokenBucket, TokenBucketConfig};
pub use registry::{Dependency, DependencyRegistry};
pub use retry::{AttemptOutcome, RetryExecutor, RetryPolicy};
