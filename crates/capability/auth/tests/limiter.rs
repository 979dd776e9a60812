use mbgw_auth::{AuthLimiter, AuthLimiterConfig, ManualClock};
use std::sync::Arc;
use std::time::Duration;

const IP: &str = "1.2.3.4";

fn limiter() -> (AuthLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let limiter = AuthLimiter::with_clock(AuthLimiterConfig::default(), clock.clone());
    (limiter, clock)
}

#[test]
fn three_failures_block_until_duration_elapses() {
    let (limiter, clock) = limiter();
    for _ in 0..3 {
        assert!(!limiter.is_blocked(IP));
        limiter.record_failure(IP);
    }
    assert!(limiter.is_blocked(IP));

    clock.advance(Duration::from_secs(179));
    assert!(limiter.is_blocked(IP));

    clock.advance(Duration::from_secs(1));
    assert!(!limiter.is_blocked(IP));
    assert_eq!(limiter.tracked(), 0);
}

#[test]
fn success_resets_the_counter() {
    let (limiter, _clock) = limiter();
    limiter.record_failure(IP);
    limiter.record_failure(IP);
    limiter.record_success(IP);
    limiter.record_failure(IP);
    assert!(!limiter.is_blocked(IP));
}

#[test]
fn other_ips_are_unaffected() {
    let (limiter, _clock) = limiter();
    for _ in 0..3 {
        limiter.record_failure(IP);
    }
    assert!(limiter.is_blocked(IP));
    assert!(!limiter.is_blocked("5.6.7.8"));
}

#[test]
fn block_log_is_throttled() {
    let (limiter, clock) = limiter();
    assert!(limiter.should_log_block(IP));
    assert!(!limiter.should_log_block(IP));
    clock.advance(Duration::from_secs(60));
    assert!(limiter.should_log_block(IP));
}

#[test]
fn disabled_limiter_never_blocks() {
    let limiter = AuthLimiter::new(AuthLimiterConfig {
        enabled: false,
        ..AuthLimiterConfig::default()
    });
    for _ in 0..10 {
        limiter.record_failure(IP);
    }
    assert!(!limiter.is_blocked(IP));
}
