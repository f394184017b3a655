use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format for log lines
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Install the Prometheus recorder on startup
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, terse output
    Compact,
    /// Multi-line, human oriented output
    Pretty,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.is_empty() {
            return Err(ConfigError::ValidationError("observability.log_level cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl WithDefaults for ObservabilityConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
