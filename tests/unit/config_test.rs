//! Unit tests for configuration loading
//!
//! Covers:
//! - Loading config/default.toml
//! - Environment variable override precedence
//! - Validation errors surfaced by `load()`
//! - Per-dependency overrides resolved against the shared sections

use lighter_resilience::config::*;
use serial_test::serial;
use std::env;

mod utils {
    /// Clean up environment variables with LIGHTER_RESILIENCE prefix
    pub fn clean_env_vars() {
        let keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("LIGHTER_RESILIENCE"))
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            unsafe { std::env::remove_var(&key) };
        }
        unsafe { std::env::remove_var("APP_ENV") };
    }
}

#[test]
#[serial]
fn test_load_default_config_success() {
    utils::clean_env_vars();

    let config = load();
    assert!(config.is_ok(), "Failed to load default configuration: {:?}", config.err());
    let config = config.unwrap();

    assert_eq!(config.app.name, "lighter-resilience");
    assert_eq!(config.app.environment, "development");

    assert!(config.resilience.circuit_breaker.enabled);
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.resilience.circuit_breaker.open_timeout, 30);
    assert_eq!(config.resilience.circuit_breaker.half_open_trial_limit, 1);

    assert_eq!(config.resilience.retry.max_attempts, 3);
    assert_eq!(config.resilience.retry.backoff, RetryBackoff::Exponential);
    assert_eq!(config.resilience.retry.base_delay, 100);
    assert_eq!(config.resilience.retry.max_delay, 10000);

    assert_eq!(config.resilience.rate_limit.capacity, 100);
    assert_eq!(config.resilience.rate_limit.refill_rate, 50.0);

    assert_eq!(config.security.rate_limit.read_requests, 10);
    assert_eq!(config.security.rate_limit.write_requests, 5);
    assert_eq!(config.security.rate_limit.window, 60);
}

#[test]
#[serial]
fn test_env_var_overrides_file_values() {
    utils::clean_env_vars();
    unsafe {
        env::set_var("LIGHTER_RESILIENCE__RESILIENCE__RETRY__MAX_ATTEMPTS", "7");
        env::set_var("LIGHTER_RESILIENCE__RESILIENCE__CIRCUIT_BREAKER__OPEN_TIMEOUT", "45");
        env::set_var("LIGHTER_RESILIENCE__OBSERVABILITY__LOG_LEVEL", "debug");
    }

    let config = load();
    utils::clean_env_vars();
    let config = config.expect("configuration should load with env overrides");

    assert_eq!(config.resilience.retry.max_attempts, 7);
    assert_eq!(config.resilience.circuit_breaker.open_timeout, 45);
    assert_eq!(config.observability.log_level, "debug");
    // Untouched values still come from the file
    assert_eq!(config.resilience.retry.base_delay, 100);
}

#[test]
#[serial]
fn test_missing_environment_file_is_not_an_error() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "does-not-exist") };

    let config = load();
    utils::clean_env_vars();

    assert!(config.is_ok());
}

#[test]
#[serial]
fn test_invalid_env_value_fails_validation() {
    utils::clean_env_vars();
    unsafe { env::set_var("LIGHTER_RESILIENCE__RESILIENCE__RETRY__MULTIPLIER", "0.5") };

    let result = load();
    utils::clean_env_vars();

    match result {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("multiplier")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_zero_capacity_rejected_only_when_enabled() {
    let mut rate_limit = RateLimitConfig {
        capacity: 0,
        ..RateLimitConfig::default()
    };
    assert!(rate_limit.validate().is_err());

    rate_limit.enabled = false;
    assert!(rate_limit.validate().is_ok());
}

#[test]
fn test_retry_delay_bounds_are_checked() {
    let retry = RetryConfig {
        base_delay: 5000,
        max_delay: 1000,
        ..RetryConfig::default()
    };
    let err = retry.validate().unwrap_err();
    assert!(err.to_string().contains("base_delay"));

    let retry = RetryConfig {
        jitter_ratio: 1.5,
        ..RetryConfig::default()
    };
    assert!(retry.validate().is_err());
}

#[test]
fn test_dependency_override_error_names_dependency() {
    let mut config = ResilienceConfig::default();
    config.dependencies.insert(
        "billing".to_string(),
        DependencyOverride {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 0,
                ..CircuitBreakerConfig::default()
            }),
            ..DependencyOverride::default()
        },
    );

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("billing"));
}

#[test]
fn test_override_resolution_falls_back_to_shared_sections() {
    let mut config = ResilienceConfig::default();
    config.dependencies.insert(
        "search".to_string(),
        DependencyOverride {
            retry: Some(RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            }),
            ..DependencyOverride::default()
        },
    );

    assert_eq!(config.retry_for("search").max_attempts, 1);
    assert_eq!(config.retry_for("orders").max_attempts, 3);
    assert_eq!(
        config.circuit_breaker_for("search"),
        &CircuitBreakerConfig::default()
    );
}

#[test]
fn test_with_defaults_is_valid() {
    let config = AppConfig::with_defaults();
    assert!(config.validate().is_ok());
    assert_eq!(config.observability.log_format, LogFormat::Compact);
}
