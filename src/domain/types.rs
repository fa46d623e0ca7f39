use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decentralized exchanges we recognize pool-creation instructions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dex {
    Raydium,
    Orca,
    Meteora,
    PumpSwap,
    Unknown,
}

impl fmt::Display for Dex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dex::Raydium => write!(f, "Raydium"),
            Dex::Orca => write!(f, "Orca"),
            Dex::Meteora => write!(f, "Meteora"),
            Dex::PumpSwap => write!(f, "PumpSwap"),
            Dex::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A newly created liquidity pool observed on-chain.
///
/// Produced by the blockchain adapter; immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPoolEvent {
    /// Transaction signature of the pool-creation instruction.
    pub signature: String,
    pub dex: Dex,
    pub pool_address: String,
    pub token_a: String,
    pub token_b: String,
    pub timestamp: DateTime<Utc>,
}

/// Output of the strategy engine for one candidate pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub should_trade: bool,
    pub target_token: String,
    pub base_token: String,
    pub pool_address: String,
    pub trade_amount_usd: f64,
    pub expected_amount_out: f64,
    pub price: f64,
    pub reason: String,
    /// 0-100, higher = riskier. Attached by the risk gate.
    pub risk_score: f64,
}

/// Result of a (real or dry-run) trade execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub success: bool,
    pub signature: Option<String>,
    pub trade_id: Option<String>,
    pub position_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TradeResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            signature: None,
            trade_id: None,
            position_id: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Spot price sample from the price-feed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceData {
    pub token_address: String,
    pub price_usd: f64,
    pub volume_24h_usd: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Pool liquidity sample from the price-feed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolData {
    pub pool_address: String,
    pub liquidity_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Severity of an exit signal; shapes ordering and slippage tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitUrgency {
    Low,
    Medium,
    High,
    Immediate,
}

/// A triggered exit condition for a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: String,
    pub urgency: ExitUrgency,
    /// When set, only this fraction (0-100] of the position is exited.
    pub partial_exit_percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Typed alert kinds emitted by the analytics subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    PriceVolatility,
    VolumeSpike,
    LiquidityDrain,
    NetworkCongestion,
    DailyLossLimit,
    DrawdownLimit,
    ConcentrationRisk,
    CorrelationRisk,
    ExposureLimit,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::PriceVolatility => "PRICE_VOLATILITY",
            AlertKind::VolumeSpike => "VOLUME_SPIKE",
            AlertKind::LiquidityDrain => "LIQUIDITY_DRAIN",
            AlertKind::NetworkCongestion => "NETWORK_CONGESTION",
            AlertKind::DailyLossLimit => "DAILY_LOSS_LIMIT",
            AlertKind::DrawdownLimit => "DRAWDOWN_LIMIT",
            AlertKind::ConcentrationRisk => "CONCENTRATION_RISK",
            AlertKind::CorrelationRisk => "CORRELATION_RISK",
            AlertKind::ExposureLimit => "EXPOSURE_LIMIT",
        };
        write!(f, "{s}")
    }
}

/// An analytics or risk alert conveyed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub pool_address: Option<String>,
    pub token_address: Option<String>,
    pub payload: serde_json::Value,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            pool_address: None,
            token_address: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token_address = Some(token.into());
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool_address = Some(pool.into());
        self
    }
}

/// Returns true for prices the position core accepts.
///
/// Zero, negative, NaN and infinite values are all invalid.
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}
