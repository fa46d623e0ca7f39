use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: usize,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: usize,
    /// How long the circuit stays open before probing.
    pub timeout: Duration,
    /// Failures older than this no longer count toward the threshold.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(300),
        }
    }
}

/// Raw counters and state-change times, exported for observers.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub success_count: usize,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Milliseconds until the open circuit allows a probe; None when not open.
    pub next_attempt_in_ms: Option<u64>,
    pub uptime_ms: u64,
    pub downtime_total_ms: u64,
}

impl CircuitBreakerStats {
    pub fn availability_pct(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        (self.total_requests - self.total_failures) as f64 / self.total_requests as f64 * 100.0
    }

    pub fn error_rate_pct(&self) -> f64 {
        100.0 - self.availability_pct()
    }

    /// Mean time between failures over the breaker's life.
    pub fn mtbf_ms(&self) -> f64 {
        if self.total_failures == 0 {
            return self.uptime_ms as f64;
        }
        self.uptime_ms as f64 / self.total_failures as f64
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    total_requests: u64,
    total_failures: u64,
    last_failure_instant: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    open_since: Option<Instant>,
    downtime_total: Duration,
}

/// Per-dependency circuit breaker.
///
/// CLOSED passes calls through and counts consecutive failures; at the
/// threshold it opens and schedules a wall-clock probe deadline. OPEN
/// rejects immediately until the deadline, then flips to HALF_OPEN on the
/// next call. HALF_OPEN closes after enough successes and reopens on any
/// failure.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    created_at: Instant,
}

/// Error type for protected calls.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker [{name}] is open; retry in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },

    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                total_failures: 0,
                last_failure_instant: None,
                last_failure_time: None,
                last_success_time: None,
                next_attempt: None,
                open_since: None,
                downtime_total: Duration::ZERO,
            }),
            created_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a future under breaker protection.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.before_call()?;
        match f.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Gate check without running anything; flips OPEN → HALF_OPEN once the
    /// deadline has passed.
    fn before_call<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;

        if inner.state == CircuitState::Open {
            let now = Instant::now();
            match inner.next_attempt {
                Some(deadline) if now < deadline => {
                    return Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_in_ms: (deadline - now).as_millis() as u64,
                    });
                }
                _ => {
                    info!(
                        "CircuitBreaker [{}]: Open -> HalfOpen (timeout elapsed)",
                        self.name
                    );
                    self.leave_open(&mut inner);
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                }
            }
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success_time = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: HalfOpen -> Closed ({} successes)",
                        self.name, inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: success recorded while Open (unexpected)",
                    self.name
                );
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        // Stale failure streaks do not accumulate across quiet periods.
        if let Some(last) = inner.last_failure_instant
            && now.duration_since(last) > self.config.monitoring_period
        {
            inner.failure_count = 0;
        }

        inner.failure_count += 1;
        inner.total_failures += 1;
        inner.last_failure_instant = Some(now);
        inner.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Closed -> Open ({} failures)",
                        self.name, inner.failure_count
                    );
                    self.enter_open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: HalfOpen -> Open (probe failed)",
                    self.name
                );
                inner.success_count = 0;
                self.enter_open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    fn enter_open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.next_attempt = Some(now + self.config.timeout);
        inner.open_since = Some(now);
    }

    fn leave_open(&self, inner: &mut BreakerInner) {
        if let Some(since) = inner.open_since.take() {
            inner.downtime_total += since.elapsed();
        }
        inner.next_attempt = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Manual reset to CLOSED with counters cleared.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.leave_open(&mut inner);
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        let total = now.duration_since(self.created_at);
        let downtime = inner.downtime_total
            + inner
                .open_since
                .map(|since| now.duration_since(since))
                .unwrap_or(Duration::ZERO);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt_in_ms: inner
                .next_attempt
                .filter(|deadline| *deadline > now)
                .map(|deadline| (deadline - now).as_millis() as u64),
            uptime_ms: total.saturating_sub(downtime).as_millis() as u64,
            downtime_total_ms: downtime.as_millis() as u64,
        }
    }
}

/// Name → breaker map. Breakers are created lazily with the default
/// config and live for the process lifetime.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
                }),
        )
    }

    /// Overall health: no breaker currently open.
    pub fn all_healthy(&self) -> bool {
        self.breakers
            .read()
            .values()
            .all(|breaker| !breaker.is_open())
    }

    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .read()
            .values()
            .map(|breaker| breaker.stats())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(timeout_ms),
            monitoring_period: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", test_config(1000));

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), &str>("error") }).await;
            assert!(result.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Next call rejects without invoking the wrapped function.
        let mut invoked = false;
        let result = cb
            .call(async {
                invoked = true;
                Ok::<(), &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn test_recovers_after_timeout() {
        let cb = CircuitBreaker::new("test", test_config(50));

        for _ in 0..3 {
            let _ = cb.call(async { Err::<(), &str>("error") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // First probe flips to HalfOpen and runs.
        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second success closes with counters reset.
        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test]
    async fn test_halfopen_failure_reopens() {
        let cb = CircuitBreaker::new("test", test_config(50));
        for _ in 0..3 {
            let _ = cb.call(async { Err::<(), &str>("error") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { Err::<(), &str>("still down") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.stats().next_attempt_in_ms.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_closed_failure_streak() {
        let cb = CircuitBreaker::new("test", test_config(1000));
        let _ = cb.call(async { Err::<(), &str>("error") }).await;
        let _ = cb.call(async { Err::<(), &str>("error") }).await;
        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        let _ = cb.call(async { Err::<(), &str>("error") }).await;
        let _ = cb.call(async { Err::<(), &str>("error") }).await;
        // Streak was broken; still closed.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stats_derived_metrics() {
        let cb = CircuitBreaker::new("test", test_config(1000));
        for _ in 0..3 {
            cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        }
        let _ = cb.call(async { Err::<(), &str>("error") }).await;

        let stats = cb.stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_failures, 1);
        assert!((stats.availability_pct() - 75.0).abs() < 1e-9);
        assert!((stats.error_rate_pct() - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_registry_lazily_creates_and_reports_health() {
        let registry = CircuitBreakerRegistry::default();
        assert!(registry.all_healthy());

        let rpc = registry.get_or_create("rpc-calls");
        let again = registry.get_or_create("rpc-calls");
        assert!(Arc::ptr_eq(&rpc, &again));
        assert_eq!(registry.names().len(), 1);

        for _ in 0..5 {
            let _ = rpc.call(async { Err::<(), &str>("down") }).await;
        }
        assert!(!registry.all_healthy());

        rpc.reset();
        assert!(registry.all_healthy());
        assert_eq!(rpc.state(), CircuitState::Closed);
    }
}
