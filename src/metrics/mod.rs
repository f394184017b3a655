use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use crate::config::AppConfig;
use crate::resilience::{CircuitState, RejectionReason};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
/// Serializes recorder installation; the global recorder can be set once
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Handle to the process-wide Prometheus recorder
///
/// Recording works without it (the `metrics` macros are no-ops until a
/// recorder exists); install it once at startup to expose `render()`.
#[derive(Clone)]
pub struct ResilienceMetrics {
    prometheus_handle: Arc<PrometheusHandle>,
}

impl ResilienceMetrics {
    /// Install the recorder, or reuse the one installed earlier
    pub fn install(config: Option<&AppConfig>) -> anyhow::Result<Self> {
        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Ok(Self::from_handle(handle));
        }

        let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished installing while we waited.
        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Ok(Self::from_handle(handle));
        }

        let builder = PrometheusBuilder::new();

        // Add global labels from config
        let builder = if let Some(cfg) = config {
            builder
                .add_global_label("service", cfg.app.name.clone())
                .add_global_label("version", cfg.app.version.clone())
                .add_global_label("environment", cfg.app.environment.clone())
        } else {
            builder
        };

        let builder = builder.set_buckets_for_metric(
            Matcher::Full("resilience_retry_delay_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )?;

        Self::describe_metrics();

        let handle = builder.install_recorder()?;
        let handle = PROMETHEUS_HANDLE.get_or_init(|| handle);

        Ok(Self::from_handle(handle))
    }

    fn from_handle(handle: &PrometheusHandle) -> Self {
        Self {
            prometheus_handle: Arc::new(handle.clone()),
        }
    }

    fn describe_metrics() {
        describe_counter!(
            "resilience_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_gauge!(
            "resilience_breaker_state",
            "Current breaker state (0 = closed, 1 = half-open, 2 = open)"
        );
        describe_counter!(
            "resilience_rejections_total",
            "Calls refused before reaching the dependency"
        );
        describe_counter!(
            "resilience_retries_total",
            "Retries scheduled after a retryable failure"
        );
        describe_histogram!(
            "resilience_retry_delay_seconds",
            "Backoff delay before a retry in seconds"
        );
        describe_counter!(
            "resilience_retries_exhausted_total",
            "Calls that failed on every attempt"
        );
    }

    // Prometheus export
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

pub fn record_transition(dependency: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "resilience_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    gauge!("resilience_breaker_state", "dependency" => dependency.to_string())
        .set(state_value(to));
}

pub fn record_rejection(dependency: &str, reason: RejectionReason) {
    counter!(
        "resilience_rejections_total",
        "dependency" => dependency.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_retry(dependency: &str, delay: Duration) {
    counter!("resilience_retries_total", "dependency" => dependency.to_string()).increment(1);
    histogram!("resilience_retry_delay_seconds", "dependency" => dependency.to_string())
        .record(delay.as_secs_f64());
}

pub fn record_exhausted(dependency: &str) {
    counter!(
        "resilience_retries_exhausted_total",
        "dependency" => dependency.to_string()
    )
    .increment(1);
}
