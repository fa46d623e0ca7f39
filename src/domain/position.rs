use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted position row, as stored by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_address: String,
    pub pool_address: String,
    pub entry_trade_id: String,
    pub entry_price: f64,
    /// Token amount held.
    pub amount: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub exit_trade_id: Option<String>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub pnl_usd: Option<f64>,
    pub pnl_percent: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.exit_timestamp.is_none()
    }

    /// USD value at entry.
    pub fn entry_value_usd(&self) -> f64 {
        self.entry_price * self.amount
    }
}

/// Live view of a monitored position. Mutable only through the atomic
/// position core; readers take the context lock briefly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionContext {
    pub position_id: String,
    pub token_address: String,
    pub entry_price: f64,
    pub amount: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub current_price: Option<f64>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub pnl_percent: Option<f64>,
    pub pnl_usd: Option<f64>,
    pub exit_reason: Option<String>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PositionContext {
    pub fn new(
        position_id: impl Into<String>,
        token_address: impl Into<String>,
        entry_price: f64,
        amount: f64,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            token_address: token_address.into(),
            entry_price,
            amount,
            entry_timestamp: Utc::now(),
            current_price: None,
            last_price_update: None,
            pnl_percent: None,
            pnl_usd: None,
            exit_reason: None,
            exit_timestamp: None,
            error: None,
        }
    }

    /// PnL derived from a price; the caller decides whether to store it.
    pub fn pnl_at(&self, price: f64) -> (f64, f64) {
        if self.entry_price <= 0.0 {
            return (0.0, 0.0);
        }
        let pct = (price - self.entry_price) / self.entry_price * 100.0;
        let usd = (price - self.entry_price) * self.amount;
        (pct, usd)
    }

    /// Minutes the position has been held.
    pub fn holding_time_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_timestamp).num_minutes()
    }
}
