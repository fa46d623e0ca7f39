//! Error recovery workflow.
//!
//! Every `error` event is matched to a per-category recovery plan (an
//! ordered chain of actions with attempt counts and delays). A secondary
//! categorical breaker stops recovery attempts for a category that keeps
//! failing, and fatal errors short-circuit into an orderly shutdown.

use crate::domain::errors::{BotError, ErrorKind};
use crate::domain::events::{BotEvent, EventListener, Notification};
use crate::domain::ports::BlockchainAdapter;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Same-category errors within this window trip the categorical breaker.
const CATEGORY_WINDOW: Duration = Duration::from_secs(300);
const CATEGORY_THRESHOLD: usize = 5;
const CATEGORY_RESET: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Reconnect,
    Retry,
    Failover,
    RestartComponent,
    Shutdown,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryAction::Reconnect => "RECONNECT",
            RecoveryAction::Retry => "RETRY",
            RecoveryAction::Failover => "FAILOVER",
            RecoveryAction::RestartComponent => "RESTART_COMPONENT",
            RecoveryAction::Shutdown => "SHUTDOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryStep {
    pub action: RecoveryAction,
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Ordered action chain for one error category.
pub fn plan_for(kind: ErrorKind) -> &'static [RecoveryStep] {
    use RecoveryAction as A;
    const CONNECTION: &[RecoveryStep] = &[
        RecoveryStep {
            action: A::Reconnect,
            max_attempts: 5,
            delay: Duration::from_secs(1),
        },
        RecoveryStep {
            action: A::Failover,
            max_attempts: 3,
            delay: Duration::from_secs(5),
        },
        RecoveryStep {
            action: A::RestartComponent,
            max_attempts: 2,
            delay: Duration::from_secs(10),
        },
    ];
    const DATABASE: &[RecoveryStep] = &[
        RecoveryStep {
            action: A::Retry,
            max_attempts: 3,
            delay: Duration::from_millis(500),
        },
        RecoveryStep {
            action: A::RestartComponent,
            max_attempts: 2,
            delay: Duration::from_secs(5),
        },
    ];
    const TRADING: &[RecoveryStep] = &[
        RecoveryStep {
            action: A::Retry,
            max_attempts: 2,
            delay: Duration::from_secs(2),
        },
        RecoveryStep {
            action: A::Failover,
            max_attempts: 1,
            delay: Duration::from_secs(5),
        },
    ];
    const SYSTEM: &[RecoveryStep] = &[
        RecoveryStep {
            action: A::RestartComponent,
            max_attempts: 3,
            delay: Duration::from_secs(1),
        },
        RecoveryStep {
            action: A::Shutdown,
            max_attempts: 1,
            delay: Duration::from_secs(30),
        },
    ];

    match kind {
        ErrorKind::Connection => CONNECTION,
        ErrorKind::Database => DATABASE,
        ErrorKind::TradingExecution => TRADING,
        ErrorKind::System | ErrorKind::StateInvariant => SYSTEM,
        // Config, analytics and user-input errors have no automatic plan.
        _ => &[],
    }
}

struct CategoryBreaker {
    recent: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

impl CategoryBreaker {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
            opened_at: None,
        }
    }

    /// Record one error; returns true when the category just tripped.
    fn record(&mut self, now: Instant) -> bool {
        if let Some(opened) = self.opened_at {
            if now.duration_since(opened) >= CATEGORY_RESET {
                self.opened_at = None;
                self.recent.clear();
            } else {
                return false;
            }
        }

        self.recent.push_back(now);
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) > CATEGORY_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= CATEGORY_THRESHOLD {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    fn is_open(&self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) => now.duration_since(opened) < CATEGORY_RESET,
            None => false,
        }
    }
}

struct RecoveryEventForwarder {
    tx: mpsc::UnboundedSender<BotError>,
}

impl EventListener for RecoveryEventForwarder {
    fn on_event(&self, event: &BotEvent) {
        if let BotEvent::Error(err) = event {
            let _ = self.tx.send(err.clone());
        }
    }
}

pub struct RecoveryWorkflow {
    bus: EventBus,
    blockchain: Arc<dyn BlockchainAdapter>,
    categories: Mutex<HashMap<ErrorKind, CategoryBreaker>>,
    rx: mpsc::UnboundedReceiver<BotError>,
}

impl RecoveryWorkflow {
    pub fn new(bus: EventBus, blockchain: Arc<dyn BlockchainAdapter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(Arc::new(RecoveryEventForwarder { tx }));
        Self {
            bus,
            blockchain,
            categories: Mutex::new(HashMap::new()),
            rx,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("RecoveryWorkflow: started");
        loop {
            tokio::select! {
                maybe_error = self.rx.recv() => {
                    match maybe_error {
                        Some(err) => self.handle_error(err, &mut shutdown).await,
                        None => return,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("RecoveryWorkflow: stopped");
                        return;
                    }
                }
            }
        }
    }

    pub async fn handle_error(&self, err: BotError, shutdown: &mut watch::Receiver<bool>) {
        if err.is_fatal() {
            error!("RecoveryWorkflow: fatal error {err}; requesting shutdown");
            self.bus.publish(BotEvent::EmergencyShutdown {
                reason: err.message.clone(),
            });
            return;
        }
        if !err.recoverable {
            warn!("RecoveryWorkflow: non-recoverable error surfaced: {err}");
            self.notify("unrecoverable error", &err.message);
            return;
        }

        if self.record_category(err.kind) {
            self.bus.publish(BotEvent::CircuitBreakerTriggered {
                name: format!("recovery:{}", err.kind),
                failures: CATEGORY_THRESHOLD as u64,
            });
        }
        if self.category_open(err.kind) {
            warn!(
                "RecoveryWorkflow: category {} breaker open, skipping recovery",
                err.kind
            );
            return;
        }

        let plan = plan_for(err.kind);
        if plan.is_empty() {
            return;
        }
        info!(
            "RecoveryWorkflow: running {} plan for {}",
            err.kind, err.context.component
        );
        let recovered = self.execute_plan(plan, &err, shutdown).await;
        if !recovered {
            error!(
                "RecoveryWorkflow: plan exhausted for {} ({})",
                err.kind, err.message
            );
            self.notify("recovery plan exhausted", &err.message);
            if matches!(err.kind, ErrorKind::Connection | ErrorKind::Database) {
                // A required component that cannot be brought back is fatal.
                self.bus.publish(BotEvent::EmergencyShutdown {
                    reason: format!("{} unrecoverable: {}", err.kind, err.message),
                });
            }
        }
    }

    async fn execute_plan(
        &self,
        plan: &[RecoveryStep],
        err: &BotError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        for step in plan {
            for attempt in 1..=step.max_attempts {
                // Delays cooperate with the shutdown signal.
                tokio::select! {
                    _ = tokio::time::sleep(step.delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return false;
                        }
                    }
                }
                info!(
                    "RecoveryWorkflow: {} attempt {}/{} for {}",
                    step.action, attempt, step.max_attempts, err.kind
                );
                if self.apply(step.action, err).await {
                    return true;
                }
            }
        }
        false
    }

    async fn apply(&self, action: RecoveryAction, err: &BotError) -> bool {
        match action {
            RecoveryAction::Reconnect | RecoveryAction::Failover => {
                match self.blockchain.reconnect().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("RecoveryWorkflow: reconnect failed: {e}");
                        false
                    }
                }
            }
            RecoveryAction::Retry => {
                // The failing caller retries under its own breaker; the
                // plan step only spaces the attempts out.
                true
            }
            RecoveryAction::RestartComponent => {
                self.notify(
                    "component restart requested",
                    &format!("{} ({})", err.context.component, err.kind),
                );
                true
            }
            RecoveryAction::Shutdown => {
                self.bus.publish(BotEvent::EmergencyShutdown {
                    reason: format!("recovery plan escalated to shutdown: {}", err.message),
                });
                true
            }
        }
    }

    fn record_category(&self, kind: ErrorKind) -> bool {
        self.categories
            .lock()
            .entry(kind)
            .or_insert_with(CategoryBreaker::new)
            .record(Instant::now())
    }

    fn category_open(&self, kind: ErrorKind) -> bool {
        self.categories
            .lock()
            .get(&kind)
            .is_some_and(|breaker| breaker.is_open(Instant::now()))
    }

    fn notify(&self, title: &str, body: &str) {
        self.bus.publish(BotEvent::Notification(Notification {
            title: title.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ErrorContext, Severity};
    use crate::infrastructure::mock::MockBlockchainAdapter;

    #[test]
    fn test_plans_match_categories() {
        let connection = plan_for(ErrorKind::Connection);
        assert_eq!(connection.len(), 3);
        assert_eq!(connection[0].action, RecoveryAction::Reconnect);
        assert_eq!(connection[0].max_attempts, 5);
        assert_eq!(connection[2].action, RecoveryAction::RestartComponent);

        let database = plan_for(ErrorKind::Database);
        assert_eq!(database[0].action, RecoveryAction::Retry);
        assert_eq!(database[0].delay, Duration::from_millis(500));

        let system = plan_for(ErrorKind::System);
        assert_eq!(system.last().unwrap().action, RecoveryAction::Shutdown);

        assert!(plan_for(ErrorKind::Config).is_empty());
    }

    #[test]
    fn test_category_breaker_trips_at_threshold() {
        let mut breaker = CategoryBreaker::new();
        let now = Instant::now();
        for i in 0..4 {
            assert!(!breaker.record(now + Duration::from_secs(i)));
        }
        assert!(breaker.record(now + Duration::from_secs(4)));
        assert!(breaker.is_open(now + Duration::from_secs(5)));
        // While open, further errors do not re-trip.
        assert!(!breaker.record(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_category_breaker_auto_resets() {
        let mut breaker = CategoryBreaker::new();
        let now = Instant::now();
        for i in 0..5 {
            breaker.record(now + Duration::from_secs(i));
        }
        assert!(breaker.is_open(now + Duration::from_secs(10)));
        assert!(!breaker.is_open(now + CATEGORY_RESET + Duration::from_secs(10)));
    }

    #[test]
    fn test_stale_errors_age_out_of_window() {
        let mut breaker = CategoryBreaker::new();
        let now = Instant::now();
        for i in 0..4 {
            breaker.record(now + Duration::from_secs(i * 10));
        }
        // Fifth error arrives after the first aged out of the 5-min window.
        assert!(!breaker.record(now + CATEGORY_WINDOW + Duration::from_secs(31)));
    }

    struct ShutdownCapture {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventListener for ShutdownCapture {
        fn on_event(&self, event: &BotEvent) {
            if let BotEvent::EmergencyShutdown { reason } = event {
                self.seen.lock().push(reason.clone());
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_error_requests_shutdown() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(ShutdownCapture {
            seen: Arc::clone(&seen),
        }));
        let workflow =
            RecoveryWorkflow::new(bus.clone(), Arc::new(MockBlockchainAdapter::new()));
        let (_tx, mut shutdown) = watch::channel(false);

        let err = BotError::new(
            ErrorKind::Connection,
            "node unreachable",
            ErrorContext::new("rpc", "subscribe"),
        )
        .with_severity(Severity::Critical)
        .with_recoverable(false);

        workflow.handle_error(err, &mut shutdown).await;
        bus.flush().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("node unreachable"));
    }
}
