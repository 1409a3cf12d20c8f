//! Error classification tables and properties of the resilience primitives

use proptest::prelude::*;
use skywatch_core::cache::{compute_key, Params};
use skywatch_core::resilience::{
    Admission, BreakerSettings, CircuitBreaker, RateLimitSettings, RateLimiter, RetryExecutor,
};
use skywatch_core::{CircuitState, ClientError, ErrorKind, LimitOrigin, RetryPolicy};
use std::time::Duration;
use test_case::test_case;
use tokio_test::{assert_err, assert_ok};

fn throttled(origin: LimitOrigin) -> ClientError {
    ClientError::RateLimitExceeded {
        provider: "nasa".into(),
        origin,
        retry_after: Some(Duration::from_secs(1)),
        retries: 0,
    }
}

fn network(status: Option<u16>) -> ClientError {
    ClientError::TransientNetwork {
        provider: "usgs".into(),
        message: "HTTP 503".into(),
        status,
        retries: 0,
    }
}

#[test_case(network(Some(503)), true, true, true ; "server error")]
#[test_case(network(None), true, true, false ; "connection failure")]
#[test_case(throttled(LimitOrigin::Provider), true, true, true ; "provider throttling")]
#[test_case(throttled(LimitOrigin::Local), true, false, false ; "local budget")]
#[test_case(ClientError::Auth { provider: "nasa".into(), status: 401 }, false, false, true ; "auth")]
#[test_case(ClientError::validation("missing date"), false, false, false ; "local validation")]
#[test_case(ClientError::configuration("unknown provider"), false, false, false ; "configuration")]
#[test_case(
    ClientError::CircuitOpen { provider: "swpc".into(), retry_after: Duration::from_secs(5) },
    false, false, false ; "circuit open"
)]
fn test_error_classification(
    error: ClientError,
    retryable: bool,
    provider_failure: bool,
    reached_provider: bool,
) {
    assert_eq!(error.is_retryable(), retryable);
    assert_eq!(error.is_provider_failure(), provider_failure);
    assert_eq!(error.reached_provider(), reached_provider);
}

#[test_case(ErrorKind::TransientNetwork, 1, 2_000 ; "first network retry")]
#[test_case(ErrorKind::TransientNetwork, 3, 8_000 ; "third network retry")]
#[test_case(ErrorKind::RateLimitExceeded, 1, 10_000 ; "first throttle retry")]
#[test_case(ErrorKind::RateLimitExceeded, 10, 300_000 ; "capped throttle retry")]
fn test_default_backoff_table(kind: ErrorKind, attempt: u32, expected_ms: u64) {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_delay(attempt, kind), Duration::from_millis(expected_ms));
}

#[test]
fn test_executor_without_delay_via_block_on() {
    let executor = RetryExecutor::new(RetryPolicy::no_retry());
    let outcome = tokio_test::block_on(executor.execute(|attempt| async move {
        if attempt == 0 {
            Err::<u32, _>(ClientError::transient("usgs", "reset"))
        } else {
            Ok(attempt)
        }
    }));
    assert_eq!(outcome.retries, 0);
    assert_eq!(outcome.into_result().unwrap_err().kind(), ErrorKind::TransientNetwork);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_admits_single_probe() {
    let breaker = CircuitBreaker::new(BreakerSettings {
        failure_threshold: 2,
        cooldown: Duration::from_secs(30),
    });
    breaker.record_failure("swpc");
    breaker.record_failure("swpc");
    assert_eq!(breaker.state("swpc"), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    let probe = assert_ok!(breaker.acquire("swpc"));
    assert!(probe.is_probe());
    let rejected = assert_err!(breaker.acquire("swpc"));
    assert_eq!(rejected.kind(), ErrorKind::CircuitOpen);

    probe.failure();
    assert_eq!(breaker.state("swpc"), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_tracks_keys_independently() {
    let limiter = RateLimiter::default()
        .with_provider(
            "nasa#demo",
            RateLimitSettings {
                min_interval: Duration::ZERO,
                hourly_limit: Some(1),
                daily_limit: Some(1),
            },
        )
        .with_provider("usgs", RateLimitSettings::default());

    assert_eq!(limiter.try_acquire("nasa#demo", true), Admission::Allow);
    assert!(matches!(limiter.try_acquire("nasa#demo", true), Admission::Exhausted { .. }));
    for _ in 0..10 {
        assert_eq!(limiter.try_acquire("usgs", true), Admission::Allow);
    }
}

fn params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,12}", 0..6)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #[test]
    fn prop_cache_key_ignores_parameter_order(pairs in params_strategy()) {
        let forward: Params = pairs.iter().cloned().collect();
        let backward: Params = pairs.iter().rev().cloned().collect();
        let base = "https://earthquake.usgs.gov/fdsnws/event/1/query";
        prop_assert_eq!(
            compute_key("usgs", "earthquakes", base, &forward),
            compute_key("usgs", "earthquakes", base, &backward)
        );
    }

    #[test]
    fn prop_backoff_monotonic_and_capped(
        base_ms in 1u64..5_000,
        max_ms in 5_000u64..600_000,
        attempt in 1u32..40,
    ) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            ..RetryPolicy::default()
        };
        let current = policy.backoff_delay(attempt, ErrorKind::TransientNetwork);
        let next = policy.backoff_delay(attempt + 1, ErrorKind::TransientNetwork);
        prop_assert!(current <= next);
        prop_assert!(next <= policy.max_delay);
    }

    #[test]
    fn prop_jitter_bounded(attempt in 1u32..12) {
        let policy = RetryPolicy::default();
        let error = ClientError::transient("usgs", "reset");
        let base = policy.backoff_delay(attempt, ErrorKind::TransientNetwork);
        let delay = policy.calculate_delay(attempt, &error);
        prop_assert!(delay >= base);
        prop_assert!(delay <= base + base.mul_f64(0.1) + Duration::from_millis(1));
    }
}
