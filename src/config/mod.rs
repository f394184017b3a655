pub mod app;
pub mod observability;
pub mod resilience;
pub mod security;

pub use app::{AppConfig, AppMetadata};
pub use observability::{LogFormat, ObservabilityConfig};
pub use resilience::{
    CircuitBreakerConfig, DependencyOverride, RateLimitConfig, ResilienceConfig, RetryBackoff,
    RetryConfig,
};
pub use security::{KeyedRateLimitConfig, SecurityConfig};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// A value was loaded but is out of range
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Range checks applied after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Construct a section with every field at its default
pub trait WithDefaults {
    fn with_defaults() -> Self;
}

/// Load the application configuration from files and environment variables
pub fn load() -> Result<AppConfig, ConfigError> {
    app::load_config()
}
