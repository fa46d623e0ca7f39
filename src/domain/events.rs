use crate::domain::errors::BotError;
use crate::domain::types::{Alert, ExitUrgency, NewPoolEvent, TradeDecision, TradeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events carried by the in-process bus.
///
/// The bus holds no ownership of the entities it conveys; every payload is
/// a self-contained clone.
#[derive(Debug, Clone)]
pub enum BotEvent {
    NewPool(NewPoolEvent),
    TradeDecision(TradeDecision),
    TradeResult(TradeResult),
    PositionUpdate(PositionUpdate),
    ExitRequest(ExitRequest),
    Error(BotError),
    SystemStatus(SystemStatusEvent),
    Notification(Notification),
    CircuitBreakerTriggered { name: String, failures: u64 },
    CircuitBreakerReset { name: String },
    Alert(Alert),
    CycleComplete { component: String, duration_ms: u64 },
    HealthStatusUpdate { healthy: bool, detail: String },
    ConfigUpdated { section: String },
    EmergencyShutdown { reason: String },
}

impl BotEvent {
    /// Stable kind label, used for logging and per-kind assertions in tests.
    pub fn kind(&self) -> &'static str {
        match self {
            BotEvent::NewPool(_) => "newPool",
            BotEvent::TradeDecision(_) => "tradeDecision",
            BotEvent::TradeResult(_) => "tradeResult",
            BotEvent::PositionUpdate(_) => "positionUpdate",
            BotEvent::ExitRequest(_) => "exitRequest",
            BotEvent::Error(_) => "error",
            BotEvent::SystemStatus(_) => "systemStatus",
            BotEvent::Notification(_) => "notification",
            BotEvent::CircuitBreakerTriggered { .. } => "circuitBreakerTriggered",
            BotEvent::CircuitBreakerReset { .. } => "circuitBreakerReset",
            BotEvent::Alert(_) => "alert",
            BotEvent::CycleComplete { .. } => "cycleComplete",
            BotEvent::HealthStatusUpdate { .. } => "healthStatusUpdate",
            BotEvent::ConfigUpdated { .. } => "configUpdated",
            BotEvent::EmergencyShutdown { .. } => "emergencyShutdown",
        }
    }
}

/// Snapshot of a position published on every monitoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position_id: String,
    pub token_address: String,
    pub state: String,
    pub current_price: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub pnl_usd: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Request to exit a position, from an exit strategy or an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRequest {
    pub position_id: String,
    pub reason: String,
    pub urgency: ExitUrgency,
    pub partial_exit_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusEvent {
    pub state: String,
    pub uptime_secs: u64,
    pub open_positions: usize,
    pub total_trades: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Subscriber interface for the event bus.
///
/// `on_event` must not block: listeners needing async work forward the
/// event into their own channel.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BotEvent);
}

/// Listener that traces every event; useful as a default subscriber.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &BotEvent) {
        tracing::debug!("EventBus: {} {:?}", event.kind(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Dex;

    #[test]
    fn test_event_kind_labels() {
        let event = BotEvent::NewPool(NewPoolEvent {
            signature: "sig".into(),
            dex: Dex::Raydium,
            pool_address: "pool".into(),
            token_a: "A".into(),
            token_b: "B".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(event.kind(), "newPool");

        let event = BotEvent::EmergencyShutdown {
            reason: "test".into(),
        };
        assert_eq!(event.kind(), "emergencyShutdown");
    }
}
