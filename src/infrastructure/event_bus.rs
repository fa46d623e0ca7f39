use crate::domain::events::{BotEvent, EventListener};
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// In-process pub/sub broker for bot events.
///
/// `publish` never blocks: events go onto an unbounded queue drained by a
/// single dispatcher task, which also makes delivery order per subscriber
/// equal to producer order. A panicking listener is logged and skipped;
/// it never poisons the event for the remaining listeners.
///
/// Must be created inside a tokio runtime (the dispatcher is spawned on
/// construction).
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
    tx: mpsc::UnboundedSender<BotEvent>,
    enqueued: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>> = Arc::new(RwLock::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel::<BotEvent>();
        let enqueued = Arc::new(AtomicU64::new(0));
        let delivered = Arc::new(AtomicU64::new(0));

        let dispatch_listeners = Arc::clone(&listeners);
        let dispatch_delivered = Arc::clone(&delivered);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let current: Vec<Arc<dyn EventListener>> =
                    dispatch_listeners.read().iter().cloned().collect();
                for listener in current {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        listener.on_event(&event);
                    }));
                    if result.is_err() {
                        error!(
                            "EventBus: listener panicked on {}; continuing delivery",
                            event.kind()
                        );
                    }
                }
                dispatch_delivered.fetch_add(1, Ordering::Release);
            }
        });

        Self {
            listeners,
            tx,
            enqueued,
            delivered,
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Enqueue an event for delivery. Safe to call from any task or thread.
    pub fn publish(&self, event: BotEvent) {
        self.enqueued.fetch_add(1, Ordering::Release);
        if self.tx.send(event).is_err() {
            warn!("EventBus: dispatcher gone, event dropped");
        }
    }

    /// Wait until every event published so far has been delivered.
    ///
    /// Test helper; production code never needs to observe the queue.
    pub async fn flush(&self) {
        let target = self.enqueued.load(Ordering::Acquire);
        while self.delivered.load(Ordering::Acquire) < target {
            tokio::task::yield_now().await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
            tx: self.tx.clone(),
            enqueued: Arc::clone(&self.enqueued),
            delivered: Arc::clone(&self.delivered),
        }
    }
}
