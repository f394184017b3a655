//! Circuit breaker behaviour through the public API

use lighter_resilience::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, MemorySink, ResilienceError,
    ResilienceEvent,
};
use lighter_resilience::ManualClock;
use std::sync::Arc;
use std::time::Duration;

fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock, MemorySink) {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let breaker = CircuitBreaker::with_parts(
        "postgres",
        config,
        Arc::new(clock.clone()),
        Arc::new(sink.clone()),
    );
    (breaker, clock, sink)
}

#[test]
fn test_full_cycle_closed_open_half_open_closed() {
    let (cb, clock, sink) = breaker(CircuitBreakerConfig {
        failure_threshold: 5,
        open_timeout: Duration::from_secs(10),
        ..CircuitBreakerConfig::default()
    });

    for _ in 0..5 {
        assert!(cb.allow());
        cb.record_failure();
    }
    assert!(!cb.allow());

    clock.advance(Duration::from_secs(10));
    assert!(cb.allow());
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    cb.record_success();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.allow());

    let snapshot = cb.snapshot();
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.success_count, 0);
    assert_eq!(
        sink.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn test_half_open_failure_discards_trial_successes() {
    let (cb, clock, _) = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        open_timeout: Duration::from_secs(5),
        half_open_trial_limit: 3,
        ..CircuitBreakerConfig::default()
    });

    cb.record_failure();
    clock.advance(Duration::from_secs(5));

    assert!(cb.allow());
    assert!(cb.allow());
    cb.record_success();
    assert_eq!(cb.snapshot().success_count, 1);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.snapshot().success_count, 0);
    assert!(!cb.allow());
}

#[test]
fn test_rejections_are_published() {
    let (cb, _, sink) = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    });

    cb.record_failure();
    assert!(!cb.allow());
    assert!(!cb.allow());

    let rejections = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, ResilienceEvent::Rejected { .. }))
        .count();
    assert_eq!(rejections, 2);
    assert_eq!(cb.total_rejected(), 2);
}

#[tokio::test]
async fn test_call_wrapper_skips_future_when_open() {
    let (cb, _, _) = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    });

    let first = cb
        .call(async { Err::<(), _>(std::io::Error::other("refused")) })
        .await;
    assert!(matches!(first, Err(ResilienceError::Terminal { attempt: 1, .. })));

    let second = cb.call(async { Ok::<_, std::io::Error>(()) }).await;
    assert!(matches!(second, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(cb.total_calls(), 1);
}
