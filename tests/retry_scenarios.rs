//! End-to-end behavior of the rate gate and retry executor on a paused clock.

use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use will_ai_resilience::resilience::retry::{FixedJitter, RetryPolicy};
use will_ai_resilience::{
    classify, ClassifiedFailure, Error, QuotaSubtype, RateGate, RateGateConfig, RemoteFailure,
    RetryExecutor, StatusField,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn executor(rpm: u32) -> RetryExecutor {
    let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(rpm).unwrap()));
    RetryExecutor::new(gate).with_jitter(Arc::new(FixedJitter(0.0)))
}

fn service_unavailable() -> RemoteFailure {
    RemoteFailure::new("The service is currently unavailable.")
        .with_status(StatusField::Object { code: Some(503) })
}

#[tokio::test(start_paused = true)]
async fn concurrent_admissions_are_fifo_and_spaced() {
    init_tracing();
    let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(20).unwrap()));
    let min_interval = gate.min_interval();
    let order = Arc::new(Mutex::new(Vec::new()));

    let calls = (0..5).map(|i| {
        let gate = gate.clone();
        let order = order.clone();
        async move {
            gate.admit().await;
            order.lock().unwrap().push((i, Instant::now()));
        }
    });
    join_all(calls).await;

    let order = order.lock().unwrap();
    let ids: Vec<_> = order.iter().map(|(i, _)| *i).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    for pair in order.windows(2) {
        let gap = pair[1].1 - pair[0].1;
        assert!(gap >= min_interval, "gap {:?} < {:?}", gap, min_interval);
    }
}

#[tokio::test(start_paused = true)]
async fn executors_sharing_a_gate_are_serialized() {
    let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(60).unwrap()));
    let a = RetryExecutor::new(gate.clone());
    let b = RetryExecutor::new(gate.clone());
    let start = Instant::now();

    let (ra, rb) = tokio::join!(
        a.execute_with_retry(|| async { Ok::<_, RemoteFailure>(1) }, "a"),
        b.execute_with_retry(|| async { Ok::<_, RemoteFailure>(2) }, "b"),
    );
    tokio_test::assert_ok!(ra);
    tokio_test::assert_ok!(rb);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(gate.snapshot().dispatches, 2);
}

// Scenario A
#[tokio::test(start_paused = true)]
async fn two_server_errors_then_success() {
    init_tracing();
    let exec = executor(6_000);
    let calls = Arc::new(AtomicU32::new(0));

    let out = exec
        .execute_with_retry(
            || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err(service_unavailable()),
                        _ => Ok("Last Will and Testament"),
                    }
                }
            },
            "generate_will",
        )
        .await
        .unwrap();

    let policy = RetryPolicy::default();
    let d1 = policy.backoff_delay_ms(1, 0.0);
    let d2 = policy.backoff_delay_ms(2, 0.0);
    assert_eq!(out.result, "Last Will and Testament");
    assert_eq!(out.metadata.attempts, 3);
    assert_eq!(out.metadata.total_wait_ms, d1 + d2);
    assert!(!out.metadata.exhausted && !out.metadata.aborted);
}

// Scenario B
#[tokio::test(start_paused = true)]
async fn daily_quota_fails_immediately() {
    let exec = executor(6_000);
    let calls = Arc::new(AtomicU32::new(0));

    let err = exec
        .execute_with_retry(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(RemoteFailure::new("daily quota").with_status_code(429))
                }
            },
            "review_answers",
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match &err {
        Error::Quota {
            failure, metadata, ..
        } => {
            assert_eq!(failure.subtype, QuotaSubtype::Rpd);
            assert_eq!(failure.retry_after_seconds, None);
            assert_eq!(metadata.attempts, 1);
            assert_eq!(metadata.total_wait_ms, 0);
        }
        other => panic!("expected quota error, got {:?}", other),
    }
    assert!(err.user_message().contains("midnight"));
}

// Scenario C
#[tokio::test(start_paused = true)]
async fn network_reset_exhausts_attempts() {
    let exec = executor(6_000);
    let reset = RemoteFailure::new("socket hang up").with_error_code("ECONNRESET");
    let calls = Arc::new(AtomicU32::new(0));

    let err = exec
        .execute_with_retry_opts(
            || {
                let calls = calls.clone();
                let reset = reset.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(reset)
                }
            },
            "generate_will",
            3,
            2_000,
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let meta = err.metadata().copied().unwrap();
    assert_eq!(meta.attempts, 3);
    assert!(meta.exhausted);
    assert!(!meta.aborted);
    assert_eq!(err.remote(), Some(&reset));
}

#[tokio::test(start_paused = true)]
async fn wait_budget_is_never_exceeded() {
    for base in [5_000u64, 12_000, 20_000, 30_000, 59_000] {
        let exec = executor(6_000).with_jitter(Arc::new(FixedJitter(0.2)));
        let start = Instant::now();
        let err = exec
            .execute_with_retry_opts(
                || async { Err::<(), _>(service_unavailable()) },
                "generate_will",
                20,
                base,
            )
            .await
            .unwrap_err();

        let meta = err.metadata().copied().unwrap();
        assert!(meta.aborted, "base {}", base);
        assert!(meta.total_wait_ms <= 60_000, "base {}", base);
        // gate spacing is 10ms per attempt on top of backoff
        let slack = Duration::from_millis(10 * u64::from(meta.attempts));
        assert!(start.elapsed() <= Duration::from_millis(meta.total_wait_ms) + slack);
    }
}

#[test]
fn rpm_quota_always_carries_retry_after() {
    for msg in ["Quota exceeded: RPM", "too many requests per minute", "rpm limit hit"] {
        let failure = RemoteFailure::new(msg).with_status(StatusField::Number(429));
        match classify(&failure) {
            ClassifiedFailure::Quota(q) => {
                assert_eq!(q.subtype, QuotaSubtype::Rpm);
                assert!(q.retry_after_seconds.is_some());
            }
            other => panic!("{}: expected quota, got {:?}", msg, other),
        }
    }
}
