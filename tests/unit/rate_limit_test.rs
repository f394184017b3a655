//! Token bucket and keyed limiter behaviour through the public API

use lighter_resilience::config::KeyedRateLimitConfig;
use lighter_resilience::resilience::{
    KeyedRateLimiter, NullSink, RequestClass, TokenBucket, TokenBucketConfig,
};
use lighter_resilience::ManualClock;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_bucket_admits_burst_then_refills_at_rate() {
    let clock = ManualClock::new();
    let bucket = TokenBucket::with_parts(
        "search",
        TokenBucketConfig {
            capacity: 10,
            refill_rate: 1.0,
        },
        Arc::new(clock.clone()),
        Arc::new(NullSink),
    );

    let admitted = (0..11).filter(|_| bucket.try_acquire(1)).count();
    assert_eq!(admitted, 10);

    clock.advance(Duration::from_secs(2));
    let admitted = (0..5).filter(|_| bucket.try_acquire(1)).count();
    assert_eq!(admitted, 2);

    let stats = bucket.stats();
    assert_eq!(stats.total_requests, 16);
    assert_eq!(stats.total_rejected, 4);
}

#[test]
fn test_keyed_limiter_uses_default_quotas() {
    let limiter = KeyedRateLimiter::new(KeyedRateLimitConfig::default());

    let reads = (0..12)
        .filter(|_| limiter.check("203.0.113.9", RequestClass::Read).is_ok())
        .count();
    let writes = (0..12)
        .filter(|_| {
            limiter
                .check("203.0.113.9", RequestClass::from_method("POST"))
                .is_ok()
        })
        .count();

    assert_eq!(reads, 10);
    assert_eq!(writes, 5);
}

#[test]
fn test_keyed_limiter_reports_retry_after() {
    let limiter = KeyedRateLimiter::new(KeyedRateLimitConfig {
        write_requests: 1,
        ..KeyedRateLimitConfig::default()
    });

    assert!(limiter.check("login:198.51.100.4", RequestClass::Write).is_ok());
    let retry_after = limiter
        .check("login:198.51.100.4", RequestClass::Write)
        .unwrap_err();
    assert!(retry_after > Duration::from_secs(30));
    assert!(retry_after <= Duration::from_secs(60));
}
