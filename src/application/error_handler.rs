//! Error enrichment and routing.
//!
//! Raw failures become `BotError` envelopes, are counted by component and
//! severity, and surface as notifications with storm suppression: repeats
//! of the same (message, component) pair inside five minutes are dropped.

use crate::domain::errors::{BotError, ErrorContext, ErrorKind, Severity};
use crate::domain::events::{BotEvent, Notification};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, warn};

const DEDUPE_WINDOW: Duration = Duration::from_secs(300);

#[derive(Default)]
struct HandlerState {
    by_component: HashMap<String, u64>,
    by_severity: HashMap<Severity, u64>,
    recent: HashMap<(String, String), Instant>,
}

pub struct ErrorHandler {
    bus: EventBus,
    state: Mutex<HandlerState>,
}

impl ErrorHandler {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Wrap a raw failure into the envelope and route it.
    pub fn capture(
        &self,
        kind: ErrorKind,
        component: &str,
        operation: &str,
        source: &anyhow::Error,
    ) -> BotError {
        let err = BotError::new(
            kind,
            source.to_string(),
            ErrorContext::new(component, operation),
        );
        self.handle(err.clone());
        err
    }

    /// Count, dedupe and publish one enriched error.
    pub fn handle(&self, err: BotError) {
        let should_notify;
        {
            let mut state = self.state.lock();
            *state
                .by_component
                .entry(err.context.component.clone())
                .or_insert(0) += 1;
            *state.by_severity.entry(err.severity).or_insert(0) += 1;

            let key = (err.message.clone(), err.context.component.clone());
            let now = Instant::now();
            should_notify = match state.recent.get(&key) {
                Some(last) if now.duration_since(*last) < DEDUPE_WINDOW => false,
                _ => {
                    state.recent.insert(key, now);
                    // Keep the dedupe map from growing without bound.
                    state
                        .recent
                        .retain(|_, seen| now.duration_since(*seen) < DEDUPE_WINDOW);
                    true
                }
            };
        }

        match err.severity {
            Severity::Critical | Severity::High => error!("{err}"),
            _ => warn!("{err}"),
        }

        self.bus.publish(BotEvent::Error(err.clone()));
        if should_notify && err.severity >= Severity::High {
            self.bus.publish(BotEvent::Notification(Notification {
                title: format!("{} error in {}", err.kind, err.context.component),
                body: err.message,
                timestamp: Utc::now(),
            }));
        }
    }

    pub fn count_for_component(&self, component: &str) -> u64 {
        self.state
            .lock()
            .by_component
            .get(component)
            .copied()
            .unwrap_or(0)
    }

    pub fn count_for_severity(&self, severity: Severity) -> u64 {
        self.state
            .lock()
            .by_severity
            .get(&severity)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NotificationCounter {
        count: Arc<AtomicUsize>,
    }

    impl EventListener for NotificationCounter {
        fn on_event(&self, event: &BotEvent) {
            if matches!(event, BotEvent::Notification(_)) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn db_error(message: &str) -> BotError {
        BotError::new(
            ErrorKind::Database,
            message,
            ErrorContext::new("repository", "insert"),
        )
    }

    #[tokio::test]
    async fn test_counts_by_component_and_severity() {
        let handler = ErrorHandler::new(EventBus::new());
        handler.handle(db_error("locked"));
        handler.handle(db_error("busy"));
        assert_eq!(handler.count_for_component("repository"), 2);
        assert_eq!(handler.count_for_severity(Severity::High), 2);
        assert_eq!(handler.count_for_component("rpc"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_notifications_suppressed() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(NotificationCounter {
            count: Arc::clone(&count),
        }));
        let handler = ErrorHandler::new(bus.clone());

        handler.handle(db_error("locked"));
        handler.handle(db_error("locked"));
        handler.handle(db_error("locked"));
        bus.flush().await;

        // One notification despite three identical errors.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Counts still reflect every occurrence.
        assert_eq!(handler.count_for_component("repository"), 3);
    }

    #[tokio::test]
    async fn test_distinct_messages_notify_separately() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(NotificationCounter {
            count: Arc::clone(&count),
        }));
        let handler = ErrorHandler::new(bus.clone());

        handler.handle(db_error("locked"));
        handler.handle(db_error("corrupt page"));
        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_low_severity_never_notifies() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(NotificationCounter {
            count: Arc::clone(&count),
        }));
        let handler = ErrorHandler::new(bus.clone());

        handler.handle(
            BotError::new(
                ErrorKind::UserInput,
                "bad token address",
                ErrorContext::new("cli", "parse"),
            ),
        );
        bus.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
