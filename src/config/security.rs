use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(Default)]
pub struct SecurityConfig {
    /// Inbound per-client rate limiting
    #[serde(default = "KeyedRateLimitConfig::default")]
    pub rate_limit: KeyedRateLimitConfig,
}

/// Per-client request throttling for inbound traffic
///
/// Reads (GET) and writes (PATCH/POST/DELETE) get separate quotas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Read requests allowed per window
    #[serde(default = "default_rate_limit_read_requests")]
    pub read_requests: u32,
    /// Write requests allowed per window
    #[serde(default = "default_rate_limit_write_requests")]
    pub write_requests: u32,
    /// Time window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub window: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_read_requests() -> u32 {
    10
}

fn default_rate_limit_write_requests() -> u32 {
    5
}

fn default_rate_limit_window() -> u64 {
    60
}

impl Default for KeyedRateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            read_requests: default_rate_limit_read_requests(),
            write_requests: default_rate_limit_write_requests(),
            window: default_rate_limit_window(),
        }
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()
    }
}

impl Validate for KeyedRateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.read_requests == 0 {
            return Err(ConfigError::ValidationError("security.rate_limit.read_requests must be > 0 when rate limiting is enabled".to_string()));
        }
        if self.enabled && self.write_requests == 0 {
            return Err(ConfigError::ValidationError("security.rate_limit.write_requests must be > 0 when rate limiting is enabled".to_string()));
        }
        if self.enabled && self.window == 0 {
            return Err(ConfigError::ValidationError("security.rate_limit.window must be > 0 when rate limiting is enabled".to_string()));
        }
        Ok(())
    }
}

impl WithDefaults for SecurityConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
