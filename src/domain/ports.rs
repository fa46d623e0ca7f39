use crate::domain::position::Position;
use crate::domain::types::{NewPoolEvent, PoolData, PriceData, TradeDecision, TradeResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;

/// One slot-performance sample from the RPC node. The period covers 60
/// slots on a healthy node.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSample {
    pub slot: u64,
    pub num_transactions: u64,
    pub sample_period_secs: f64,
}

/// On-chain event source. Pool discovery plus the raw node telemetry the
/// market monitor samples.
#[async_trait]
pub trait BlockchainAdapter: Send + Sync {
    async fn subscribe_new_pools(&self) -> Result<Receiver<NewPoolEvent>>;
    async fn get_slot(&self) -> Result<u64>;
    async fn get_recent_performance_samples(&self, limit: usize)
    -> Result<Vec<PerformanceSample>>;
    async fn reconnect(&self) -> Result<()>;
    async fn initialize(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// Pool evaluation policy. Returns None when the pool is not tradeable.
#[async_trait]
pub trait StrategyEngine: Send + Sync {
    async fn evaluate_pool(&self, pool: &NewPoolEvent) -> Result<Option<TradeDecision>>;
}

/// Swap submission. Never called when dry-run is active.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_trade(&self, decision: &TradeDecision) -> Result<TradeResult>;

    /// Sell out of a position. `percentage` limits the exit to a fraction
    /// of the held amount; None sells everything.
    async fn execute_exit(&self, position: &Position, percentage: Option<f64>)
    -> Result<TradeResult>;
}

/// Narrow persistence seam. The embedded database behind it is an external
/// collaborator; the core only sees row-level operations.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn add_position(&self, position: Position) -> Result<()>;
    async fn get_position(&self, id: &str) -> Result<Option<Position>>;
    async fn get_open_positions(&self) -> Result<Vec<Position>>;
    async fn close_position(
        &self,
        id: &str,
        exit_trade_id: &str,
        exit_timestamp: DateTime<Utc>,
        pnl_usd: f64,
        pnl_percent: f64,
    ) -> Result<()>;
    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// Aggregated price/liquidity source with prioritized upstream fallbacks.
#[async_trait]
pub trait PriceFeedService: Send + Sync {
    async fn get_token_price(&self, token_address: &str) -> Result<Option<PriceData>>;
    async fn get_pool_liquidity(&self, pool_address: &str) -> Result<Option<PoolData>>;
}

/// Stablecoins bypass the feed entirely; their price is pinned at $1.
pub const STABLECOIN_ADDRESSES: &[&str] = &[
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", // USDC
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", // USDT
];

pub fn is_stablecoin(address: &str) -> bool {
    STABLECOIN_ADDRESSES.contains(&address)
}

pub fn stablecoin_price(address: &str) -> Option<PriceData> {
    if !is_stablecoin(address) {
        return None;
    }
    Some(PriceData {
        token_address: address.to_string(),
        price_usd: 1.0,
        volume_24h_usd: None,
        timestamp: Utc::now(),
        source: "fixed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stablecoin_bypass() {
        let usdc = STABLECOIN_ADDRESSES[0];
        assert!(is_stablecoin(usdc));
        let data = stablecoin_price(usdc).unwrap();
        assert_eq!(data.price_usd, 1.0);
        assert_eq!(data.source, "fixed");
        assert!(stablecoin_price("So11111111111111111111111111111111111111112").is_none());
    }

}
