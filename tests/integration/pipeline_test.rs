//! End-to-end scenarios for the facade

use lighter_resilience::config::{
    CircuitBreakerConfig, DependencyOverride, RateLimitConfig, ResilienceConfig, RetryConfig,
};
use lighter_resilience::resilience::{
    CircuitState, DependencyRegistry, MemorySink, Resilience, ResilienceError, ResilienceEvent,
    RetryPolicy,
};
use lighter_resilience::{ManualClock, SystemClock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
enum DownstreamError {
    #[error("connection refused")]
    Unavailable,
    #[error("bad request")]
    Rejected,
}

fn transient(e: &DownstreamError) -> bool {
    matches!(e, DownstreamError::Unavailable)
}

fn config() -> ResilienceConfig {
    let mut config = ResilienceConfig {
        retry: RetryConfig {
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        },
        ..ResilienceConfig::default()
    };
    config.dependencies.insert(
        "inventory".to_string(),
        DependencyOverride {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout: 10,
                ..CircuitBreakerConfig::default()
            }),
            ..DependencyOverride::default()
        },
    );
    config
}

struct Harness {
    resilience: Resilience,
    clock: ManualClock,
    sink: MemorySink,
}

fn harness(config: ResilienceConfig) -> Harness {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let registry =
        DependencyRegistry::with_parts(config, Arc::new(clock.clone()), Arc::new(sink.clone()));
    Harness {
        resilience: Resilience::new(registry),
        clock,
        sink,
    }
}

#[tokio::test]
async fn test_outage_opens_breaker_then_recovers() {
    let h = harness(config());
    let dependency = h.resilience.registry().get_or_create("inventory");
    let policy = *dependency.retry_policy();
    let healthy = AtomicU32::new(0);

    // Three failing attempts inside one call trip the breaker.
    let result: Result<(), _> = h
        .resilience
        .run(
            "inventory",
            &policy,
            |_| async { Err(DownstreamError::Unavailable) },
            transient,
        )
        .await;
    assert!(matches!(
        result,
        Err(ResilienceError::RetriesExhausted { attempts: 3, .. })
    ));
    let breaker = dependency.breaker().unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // While open, the operation is not invoked.
    let result = h
        .resilience
        .run(
            "inventory",
            &policy,
            |_| {
                healthy.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, DownstreamError>(()) }
            },
            transient,
        )
        .await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(healthy.load(Ordering::SeqCst), 0);

    // After the open timeout a trial goes through and closes the breaker.
    h.clock.advance(Duration::from_secs(10));
    let result = h
        .resilience
        .run(
            "inventory",
            &policy,
            |_| {
                healthy.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, DownstreamError>("restocked") }
            },
            transient,
        )
        .await;
    assert_eq!(result.unwrap(), "restocked");
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);

    assert_eq!(
        h.sink.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test]
async fn test_terminal_error_is_not_retried_and_waits_nothing() {
    let h = harness(config());
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = h
        .resilience
        .run(
            "billing",
            &RetryPolicy::default(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DownstreamError::Rejected) }
            },
            transient,
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ResilienceError::Terminal { attempt: 1, .. }));
    assert_eq!(err.status_code(), 500);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_backoff_waits_follow_policy() {
    let h = harness(config());

    let result: Result<(), _> = h
        .resilience
        .run(
            "search",
            &RetryPolicy::from(&RetryConfig {
                max_attempts: 4,
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            }),
            |_| async { Err(DownstreamError::Unavailable) },
            transient,
        )
        .await;

    assert!(matches!(
        result,
        Err(ResilienceError::RetriesExhausted { attempts: 4, .. })
    ));
    assert_eq!(
        h.clock.sleeps(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
    let scheduled: Vec<u32> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ResilienceEvent::RetryScheduled { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_rate_limit_rejection_is_surfaced_not_retried() {
    let mut config = config();
    config.rate_limit = RateLimitConfig {
        enabled: true,
        capacity: 2,
        refill_rate: 1.0,
    };
    let h = harness(config);
    let calls = AtomicU32::new(0);
    let op = |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, DownstreamError>(()) }
    };

    for _ in 0..2 {
        assert!(h.resilience.run("geo", &RetryPolicy::default(), op, transient).await.is_ok());
    }
    let err = h
        .resilience
        .run("geo", &RetryPolicy::default(), op, transient)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(matches!(err, ResilienceError::RateLimited { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    h.clock.advance(Duration::from_secs(1));
    assert!(h.resilience.run("geo", &RetryPolicy::default(), op, transient).await.is_ok());
}

#[tokio::test]
async fn test_cancellation_stops_retries_during_backoff() {
    let resilience = Resilience::new(DependencyRegistry::with_parts(
        config(),
        SystemClock::shared(),
        Arc::new(MemorySink::new()),
    ));
    let slow_backoff = RetryPolicy::from(&RetryConfig {
        max_attempts: 5,
        base_delay: 30_000,
        max_delay: 30_000,
        jitter_ratio: 0.0,
        ..RetryConfig::default()
    });
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result: Result<(), _> = resilience
        .run_with_cancel(
            "warehouse",
            &slow_backoff,
            |_| async { Err(DownstreamError::Unavailable) },
            transient,
            &token,
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ResilienceError::Cancelled { attempts: 1 }));
    assert_eq!(err.status_code(), 499);
}

#[tokio::test]
async fn test_deadline_covers_retries_and_waits() {
    let mut config = config();
    config.dependencies.insert(
        "ledger".to_string(),
        DependencyOverride {
            circuit_breaker: Some(CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            }),
            ..DependencyOverride::default()
        },
    );
    let resilience = Resilience::new(DependencyRegistry::with_parts(
        config,
        SystemClock::shared(),
        Arc::new(MemorySink::new()),
    ));
    assert!(resilience.registry().get_or_create("ledger").breaker().is_none());
    let policy = RetryPolicy::from(&RetryConfig {
        max_attempts: 10,
        base_delay: 20,
        max_delay: 20,
        jitter_ratio: 0.0,
        ..RetryConfig::default()
    });

    let result: Result<(), _> = resilience
        .run_with_deadline(
            "ledger",
            &policy,
            |_| async { Err(DownstreamError::Unavailable) },
            transient,
            Duration::from_millis(50),
        )
        .await;

    match result {
        Err(ResilienceError::Cancelled { attempts }) => assert!((1..10).contains(&attempts)),
        other => panic!("expected the deadline to cancel the loop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hung_attempts_time_out_and_count_against_breaker() {
    let mut config = config();
    config.dependencies.insert(
        "pricing".to_string(),
        DependencyOverride {
            retry: Some(RetryConfig {
                max_attempts: 2,
                min_delay: 300,
                jitter_ratio: 0.0,
                attempt_timeout: 1_000,
                ..RetryConfig::default()
            }),
            ..DependencyOverride::default()
        },
    );
    let h = harness(config);
    let dependency = h.resilience.registry().get_or_create("pricing");
    let policy = *dependency.retry_policy();

    let result: Result<(), _> = h
        .resilience
        .run(
            "pricing",
            &policy,
            |_| std::future::pending::<Result<(), DownstreamError>>(),
            transient,
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ResilienceError::TimedOut { attempts: 2 }));
    assert_eq!(err.status_code(), 504);
    assert_eq!(
        h.clock.sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_millis(300),
            Duration::from_secs(1),
        ]
    );
    let breaker = dependency.breaker().unwrap();
    assert_eq!(breaker.total_failures(), 2);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
