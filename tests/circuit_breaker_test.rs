//! S3 and the breaker law: OPEN rejects without invoking the wrapped call.

use snipebot::infrastructure::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn config(timeout: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        timeout,
        monitoring_period: Duration::from_secs(300),
    }
}

/// S3: five failures open the breaker; the sixth call rejects
/// immediately; after the timeout the breaker probes through HALF_OPEN
/// and closes after the success threshold with counters reset.
#[tokio::test]
async fn test_open_halfopen_closed_cycle() {
    let breaker = CircuitBreaker::new("rpc-calls", config(Duration::from_millis(100)));

    for _ in 0..5 {
        let result = breaker.call(async { Err::<(), &str>("node down") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // The sixth call is rejected without running the closure.
    let invoked = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&invoked);
    let result = breaker
        .call(async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok::<(), &str>(())
        })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    // Clock advance past the deadline: next call probes.
    tokio::time::sleep(Duration::from_millis(150)).await;
    breaker.call(async { Ok::<(), &str>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.call(async { Ok::<(), &str>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);
}

/// Property 4: while OPEN and before the deadline, every call rejects in
/// bounded time without touching the wrapped function.
#[tokio::test]
async fn test_open_rejects_fast_and_never_invokes() {
    let breaker = Arc::new(CircuitBreaker::new(
        "slow-dep",
        config(Duration::from_secs(60)),
    ));
    for _ in 0..5 {
        let _ = breaker.call(async { Err::<(), &str>("down") }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = Arc::new(AtomicUsize::new(0));
    let started = std::time::Instant::now();
    for _ in 0..100 {
        let count = Arc::clone(&invoked);
        let result = breaker
            .call(async move {
                count.fetch_add(1, Ordering::SeqCst);
                // Would block for a long time if ever polled.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_secs(1));

    let stats = breaker.stats();
    assert!(stats.next_attempt_in_ms.is_some());
    assert_eq!(stats.total_requests, 105);
}

#[tokio::test]
async fn test_halfopen_failure_reopens_with_new_deadline() {
    let breaker = CircuitBreaker::new("flaky", config(Duration::from_millis(80)));
    for _ in 0..5 {
        let _ = breaker.call(async { Err::<(), &str>("down") }).await;
    }
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Probe fails: straight back to OPEN.
    let _ = breaker.call(async { Err::<(), &str>("still down") }).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.stats().next_attempt_in_ms.is_some());
}

#[tokio::test]
async fn test_registry_health_and_lazy_creation() {
    let registry = CircuitBreakerRegistry::new(config(Duration::from_secs(60)));
    assert!(registry.all_healthy());

    let rpc = registry.get_or_create("rpc-calls");
    let feed = registry.get_or_create("price-feed");
    assert_eq!(registry.names().len(), 2);

    for _ in 0..5 {
        let _ = rpc.call(async { Err::<(), &str>("down") }).await;
    }
    assert!(!registry.all_healthy());
    assert_eq!(feed.state(), CircuitState::Closed);

    let stats = registry.stats();
    let rpc_stats = stats.iter().find(|s| s.name == "rpc-calls").unwrap();
    assert_eq!(rpc_stats.total_failures, 5);
    assert_eq!(rpc_stats.error_rate_pct(), 100.0);
}
