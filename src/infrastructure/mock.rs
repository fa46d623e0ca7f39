//! Mock adapters for tests and dry-run wiring.

use crate::domain::ports::{
    BlockchainAdapter, PerformanceSample, PriceFeedService, StrategyEngine, TradeExecutor,
    stablecoin_price,
};
use crate::domain::position::Position;
use crate::domain::types::{NewPoolEvent, PoolData, PriceData, TradeDecision, TradeResult};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Blockchain adapter fed manually by tests.
pub struct MockBlockchainAdapter {
    pool_tx: mpsc::Sender<NewPoolEvent>,
    pool_rx: Mutex<Option<mpsc::Receiver<NewPoolEvent>>>,
    slot: AtomicU64,
    /// Seconds per slot reported in performance samples.
    pub slot_time_secs: RwLock<f64>,
}

impl MockBlockchainAdapter {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(64);
        Self {
            pool_tx,
            pool_rx: Mutex::new(Some(pool_rx)),
            slot: AtomicU64::new(1000),
            slot_time_secs: RwLock::new(0.4),
        }
    }

    pub fn pool_sender(&self) -> mpsc::Sender<NewPoolEvent> {
        self.pool_tx.clone()
    }

    pub fn set_slot_time(&self, secs: f64) {
        *self.slot_time_secs.write() = secs;
    }
}

impl Default for MockBlockchainAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockchainAdapter for MockBlockchainAdapter {
    async fn subscribe_new_pools(&self) -> Result<mpsc::Receiver<NewPoolEvent>> {
        self.pool_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow!("pool stream already subscribed"))
    }

    async fn get_slot(&self) -> Result<u64> {
        Ok(self.slot.fetch_add(1, Ordering::Relaxed))
    }

    async fn get_recent_performance_samples(
        &self,
        limit: usize,
    ) -> Result<Vec<PerformanceSample>> {
        let slot_time = *self.slot_time_secs.read();
        Ok((0..limit)
            .map(|i| PerformanceSample {
                slot: self.slot.load(Ordering::Relaxed).saturating_sub(i as u64),
                num_transactions: 2500,
                sample_period_secs: slot_time * 60.0,
            })
            .collect())
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Strategy engine returning a canned decision per pool address.
pub struct MockStrategyEngine {
    decisions: RwLock<HashMap<String, TradeDecision>>,
}

impl MockStrategyEngine {
    pub fn new() -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_decision(&self, pool_address: impl Into<String>, decision: TradeDecision) {
        self.decisions.write().insert(pool_address.into(), decision);
    }
}

impl Default for MockStrategyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyEngine for MockStrategyEngine {
    async fn evaluate_pool(&self, pool: &NewPoolEvent) -> Result<Option<TradeDecision>> {
        Ok(self.decisions.read().get(&pool.pool_address).cloned())
    }
}

/// Executor that fabricates successful fills (or scripted failures).
pub struct MockTradeExecutor {
    pub calls: AtomicUsize,
    fail_with: RwLock<Option<String>>,
}

impl MockTradeExecutor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: RwLock::new(None),
        }
    }

    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_with.write() = Some(reason.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTradeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeExecutor for MockTradeExecutor {
    async fn execute_trade(&self, _decision: &TradeDecision) -> Result<TradeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_with.write().take() {
            return Ok(TradeResult::failed(reason));
        }
        Ok(TradeResult {
            success: true,
            signature: Some(format!("sig-{}", Uuid::new_v4())),
            trade_id: Some(format!("tr-{}", Uuid::new_v4())),
            position_id: Some(format!("pos-{}", Uuid::new_v4())),
            error: None,
            timestamp: Utc::now(),
        })
    }

    async fn execute_exit(
        &self,
        position: &Position,
        _percentage: Option<f64>,
    ) -> Result<TradeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_with.write().take() {
            return Err(anyhow!(reason));
        }
        Ok(TradeResult {
            success: true,
            signature: Some(format!("sig-{}", Uuid::new_v4())),
            trade_id: Some(format!("exit-{}", Uuid::new_v4())),
            position_id: Some(position.id.clone()),
            error: None,
            timestamp: Utc::now(),
        })
    }
}

/// Price feed with test-settable prices and liquidity.
pub struct MockPriceFeed {
    prices: RwLock<HashMap<String, f64>>,
    liquidity: RwLock<HashMap<String, f64>>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            liquidity: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_price(&self, token: impl Into<String>, price: f64) {
        self.prices.write().insert(token.into(), price);
    }

    pub fn set_liquidity(&self, pool: impl Into<String>, liquidity_usd: f64) {
        self.liquidity.write().insert(pool.into(), liquidity_usd);
    }
}

impl Default for MockPriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeedService for MockPriceFeed {
    async fn get_token_price(&self, token_address: &str) -> Result<Option<PriceData>> {
        if let Some(fixed) = stablecoin_price(token_address) {
            return Ok(Some(fixed));
        }
        Ok(self
            .prices
            .read()
            .get(token_address)
            .map(|price| PriceData {
                token_address: token_address.to_string(),
                price_usd: *price,
                volume_24h_usd: None,
                timestamp: Utc::now(),
                source: "mock".to_string(),
            }))
    }

    async fn get_pool_liquidity(&self, pool_address: &str) -> Result<Option<PoolData>> {
        Ok(self
            .liquidity
            .read()
            .get(pool_address)
            .map(|liquidity| PoolData {
                pool_address: pool_address.to_string(),
                liquidity_usd: *liquidity,
                timestamp: Utc::now(),
            }))
    }
}

/// Bundle used by integration tests and the dry-run demo wiring.
pub struct MockStack {
    pub blockchain: Arc<MockBlockchainAdapter>,
    pub strategy: Arc<MockStrategyEngine>,
    pub executor: Arc<MockTradeExecutor>,
    pub price_feed: Arc<MockPriceFeed>,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            blockchain: Arc::new(MockBlockchainAdapter::new()),
            strategy: Arc::new(MockStrategyEngine::new()),
            executor: Arc::new(MockTradeExecutor::new()),
            price_feed: Arc::new(MockPriceFeed::new()),
        }
    }
}

impl Default for MockStack {
    fn default() -> Self {
        Self::new()
    }
}
