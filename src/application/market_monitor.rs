//! Rolling-window market surveillance.
//!
//! Tracks per-token price/volume series, per-pool liquidity and node
//! performance, and raises typed alerts when thresholds are crossed. All
//! RPC-touching work runs under the `rpc-calls` circuit breaker.

use crate::domain::events::BotEvent;
use crate::domain::ports::BlockchainAdapter;
use crate::domain::rolling::RollingSeries;
use crate::domain::types::{Alert, AlertKind, AlertSeverity};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::event_bus::EventBus;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const RPC_BREAKER: &str = "rpc-calls";

/// Slots covered by one performance sample.
const SLOTS_PER_SAMPLE: f64 = 60.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Return volatility (×100) above this raises PRICE_VOLATILITY.
    pub price_volatility_threshold: f64,
    /// Latest volume above mean × this raises VOLUME_SPIKE.
    pub volume_spike_multiplier: f64,
    /// Fractional drop from the window's first liquidity sample that
    /// raises LIQUIDITY_DRAIN (0.3 = 30 %).
    pub liquidity_drop_threshold: f64,
    pub monitoring_interval: Duration,
    /// Width of every rolling window.
    pub data_window_minutes: i64,
    /// Expected seconds per slot on a healthy network.
    pub expected_slot_time_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            price_volatility_threshold: 10.0,
            volume_spike_multiplier: 3.0,
            liquidity_drop_threshold: 0.3,
            monitoring_interval: Duration::from_secs(30),
            data_window_minutes: 30,
            expected_slot_time_secs: 0.4,
        }
    }
}

/// Qualitative market condition snapshot published with each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCondition {
    pub timestamp: chrono::DateTime<Utc>,
    pub volatility: VolatilityBand,
    pub sentiment: Sentiment,
    /// 0-10, higher = deeper pools.
    pub liquidity_score: f64,
    pub congestion_pct: f64,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityBand {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bearish,
    Neutral,
    Bullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    Proceed,
    ReduceSize,
    Hold,
}

struct MonitorState {
    prices: HashMap<String, RollingSeries<f64>>,
    volumes: HashMap<String, RollingSeries<f64>>,
    liquidity: HashMap<String, RollingSeries<f64>>,
    slot_times: RollingSeries<f64>,
}

pub struct MarketMonitor {
    config: MonitorConfig,
    state: RwLock<MonitorState>,
    blockchain: Arc<dyn BlockchainAdapter>,
    breakers: Arc<CircuitBreakerRegistry>,
    bus: EventBus,
}

impl MarketMonitor {
    pub fn new(
        config: MonitorConfig,
        blockchain: Arc<dyn BlockchainAdapter>,
        breakers: Arc<CircuitBreakerRegistry>,
        bus: EventBus,
    ) -> Self {
        let window = ChronoDuration::minutes(config.data_window_minutes);
        Self {
            state: RwLock::new(MonitorState {
                prices: HashMap::new(),
                volumes: HashMap::new(),
                liquidity: HashMap::new(),
                slot_times: RollingSeries::new(window, 600),
            }),
            config,
            blockchain,
            breakers,
            bus,
        }
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.config.data_window_minutes)
    }

    pub fn record_price(&self, token: &str, price: f64) {
        if !crate::domain::types::is_valid_price(price) {
            return;
        }
        let window = self.window();
        self.state
            .write()
            .prices
            .entry(token.to_string())
            .or_insert_with(|| RollingSeries::new(window, 1800))
            .push_now(price);
    }

    pub fn record_volume(&self, token: &str, volume_usd: f64) {
        if !volume_usd.is_finite() || volume_usd < 0.0 {
            return;
        }
        let window = self.window();
        self.state
            .write()
            .volumes
            .entry(token.to_string())
            .or_insert_with(|| RollingSeries::new(window, 1800))
            .push_now(volume_usd);
    }

    pub fn record_liquidity(&self, pool: &str, liquidity_usd: f64) {
        if !liquidity_usd.is_finite() || liquidity_usd < 0.0 {
            return;
        }
        let window = self.window();
        self.state
            .write()
            .liquidity
            .entry(pool.to_string())
            .or_insert_with(|| RollingSeries::new(window, 1800))
            .push_now(liquidity_usd);
    }

    /// Latest tracked liquidity for one pool.
    pub fn pool_liquidity(&self, pool: &str) -> Option<f64> {
        self.state
            .read()
            .liquidity
            .get(pool)
            .and_then(|series| series.latest().copied())
    }

    /// Smallest tracked pool liquidity; feeds the risk manager.
    pub fn min_pool_liquidity(&self) -> Option<f64> {
        self.state
            .read()
            .liquidity
            .values()
            .filter_map(|series| series.latest().copied())
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Mean return volatility across tracked tokens (σ, not ×100).
    pub fn overall_volatility(&self) -> f64 {
        let state = self.state.read();
        let vols: Vec<f64> = state
            .prices
            .values()
            .filter_map(|series| series.return_volatility())
            .collect();
        if vols.is_empty() {
            return 0.0;
        }
        vols.iter().sum::<f64>() / vols.len() as f64
    }

    /// One surveillance pass: node telemetry, threshold alerts, trims.
    pub async fn analyze_cycle(&self) -> MarketCondition {
        let started = std::time::Instant::now();
        let congestion_pct = self.sample_network().await;
        let alerts = self.collect_alerts(congestion_pct);
        for alert in alerts {
            self.bus.publish(BotEvent::Alert(alert));
        }

        let now = Utc::now();
        {
            let mut state = self.state.write();
            for series in state.prices.values_mut() {
                series.trim(now);
            }
            for series in state.volumes.values_mut() {
                series.trim(now);
            }
            for series in state.liquidity.values_mut() {
                series.trim(now);
            }
            state.slot_times.trim(now);
        }

        let condition = self.condition(congestion_pct);
        let healthy = self.breakers.all_healthy();
        self.bus.publish(BotEvent::HealthStatusUpdate {
            healthy,
            detail: if healthy {
                "all breakers closed".to_string()
            } else {
                format!(
                    "open breakers: {}",
                    self.breakers
                        .stats()
                        .iter()
                        .filter(|s| s.state == crate::infrastructure::circuit_breaker::CircuitState::Open)
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            },
        });
        self.bus.publish(BotEvent::CycleComplete {
            component: "market-monitor".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        condition
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("MarketMonitor: surveillance loop started");
        let mut interval = tokio::time::interval(self.config.monitoring_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let condition = self.analyze_cycle().await;
                    debug!(
                        "MarketMonitor: volatility={:?} congestion={:.0}%",
                        condition.volatility, condition.congestion_pct
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("MarketMonitor: surveillance loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Fetch slot + performance samples under the rpc breaker and return
    /// the congestion percentage.
    async fn sample_network(&self) -> f64 {
        let breaker = self.breakers.get_or_create(RPC_BREAKER);

        let slot = breaker.call(self.blockchain.get_slot()).await;
        if let Err(e) = &slot {
            warn!("MarketMonitor: slot fetch failed: {e}");
        }

        let samples = breaker
            .call(self.blockchain.get_recent_performance_samples(5))
            .await;
        let avg_slot_time = match samples {
            Ok(samples) if !samples.is_empty() => {
                let total: f64 = samples
                    .iter()
                    .map(|s| s.sample_period_secs / SLOTS_PER_SAMPLE)
                    .sum();
                let avg = total / samples.len() as f64;
                // Smooth over the window so one bad sample does not flap
                // the congestion signal.
                let mut state = self.state.write();
                state.slot_times.push_now(avg);
                state.slot_times.mean().unwrap_or(avg)
            }
            Ok(_) => return 0.0,
            Err(e) => {
                warn!("MarketMonitor: performance samples failed: {e}");
                return 0.0;
            }
        };

        let expected = self.config.expected_slot_time_secs;
        if expected <= 0.0 {
            return 0.0;
        }
        ((avg_slot_time - expected) / expected * 100.0).clamp(0.0, 100.0)
    }

    fn collect_alerts(&self, congestion_pct: f64) -> Vec<Alert> {
        let state = self.state.read();
        let mut alerts = Vec::new();

        for (token, series) in &state.prices {
            if let Some(sigma) = series.return_volatility() {
                let volatility_pct = sigma * 100.0;
                if volatility_pct > self.config.price_volatility_threshold {
                    alerts.push(
                        Alert::new(
                            AlertKind::PriceVolatility,
                            AlertSeverity::Warning,
                            format!("return volatility {volatility_pct:.1}% over threshold"),
                        )
                        .with_token(token.clone()),
                    );
                }
            }
        }

        for (token, series) in &state.volumes {
            if let (Some(latest), Some(mean)) = (series.latest(), series.mean())
                && series.len() >= 3
                && mean > 0.0
                && *latest > mean * self.config.volume_spike_multiplier
            {
                alerts.push(
                    Alert::new(
                        AlertKind::VolumeSpike,
                        AlertSeverity::Info,
                        format!("volume {latest:.0} is {:.1}x the mean", latest / mean),
                    )
                    .with_token(token.clone()),
                );
            }
        }

        for (pool, series) in &state.liquidity {
            if let (Some(latest), Some(first)) = (series.latest(), series.oldest())
                && *first > 0.0
            {
                let drop = (first - latest) / first;
                if drop >= self.config.liquidity_drop_threshold {
                    alerts.push(
                        Alert::new(
                            AlertKind::LiquidityDrain,
                            AlertSeverity::Critical,
                            format!("liquidity down {:.0}% inside the window", drop * 100.0),
                        )
                        .with_pool(pool.clone()),
                    );
                }
            }
        }

        if congestion_pct > 50.0 {
            alerts.push(Alert::new(
                AlertKind::NetworkCongestion,
                AlertSeverity::Warning,
                format!("network congestion at {congestion_pct:.0}%"),
            ));
        }

        alerts
    }

    fn condition(&self, congestion_pct: f64) -> MarketCondition {
        let sigma = self.overall_volatility();
        let volatility = match sigma * 100.0 {
            v if v > 50.0 => VolatilityBand::Extreme,
            v if v > 20.0 => VolatilityBand::High,
            v if v > 5.0 => VolatilityBand::Medium,
            _ => VolatilityBand::Low,
        };

        // Mean of latest returns across tokens decides the lean.
        let state = self.state.read();
        let mut last_returns = Vec::new();
        for series in state.prices.values() {
            if let Some(r) = series.returns().last() {
                last_returns.push(*r);
            }
        }
        let mean_return = if last_returns.is_empty() {
            0.0
        } else {
            last_returns.iter().sum::<f64>() / last_returns.len() as f64
        };
        let sentiment = if mean_return > 0.01 {
            Sentiment::Bullish
        } else if mean_return < -0.01 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        };

        let liquidity_score = state
            .liquidity
            .values()
            .filter_map(|series| series.latest())
            .map(|l| (l / 10_000.0 * 10.0).clamp(0.0, 10.0))
            .fold(None::<f64>, |acc, score| {
                Some(acc.map_or(score, |a| a.min(score)))
            })
            .unwrap_or(5.0);

        let recommended_action = match (volatility, congestion_pct) {
            (VolatilityBand::Extreme, _) => RecommendedAction::Hold,
            (_, c) if c > 80.0 => RecommendedAction::Hold,
            (VolatilityBand::High, _) => RecommendedAction::ReduceSize,
            _ => RecommendedAction::Proceed,
        };

        MarketCondition {
            timestamp: Utc::now(),
            volatility,
            sentiment,
            liquidity_score,
            congestion_pct,
            recommended_action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBlockchainAdapter;

    fn monitor() -> MarketMonitor {
        MarketMonitor::new(
            MonitorConfig::default(),
            Arc::new(MockBlockchainAdapter::new()),
            Arc::new(CircuitBreakerRegistry::default()),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_volatility_alert_raised() {
        let m = monitor();
        for price in [1.0, 1.5, 0.6, 1.8, 0.5, 2.0] {
            m.record_price("T1", price);
        }
        let alerts = m.collect_alerts(0.0);
        assert!(
            alerts
                .iter()
                .any(|a| a.kind == AlertKind::PriceVolatility
                    && a.token_address.as_deref() == Some("T1"))
        );
    }

    #[tokio::test]
    async fn test_volume_spike_alert() {
        let m = monitor();
        for volume in [100.0, 120.0, 110.0, 105.0] {
            m.record_volume("T1", volume);
        }
        m.record_volume("T1", 2000.0);
        let alerts = m.collect_alerts(0.0);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::VolumeSpike));
    }

    #[tokio::test]
    async fn test_liquidity_drain_alert() {
        let m = monitor();
        m.record_liquidity("P1", 10_000.0);
        m.record_liquidity("P1", 9_000.0);
        m.record_liquidity("P1", 5_000.0);
        let alerts = m.collect_alerts(0.0);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::LiquidityDrain));
    }

    #[tokio::test]
    async fn test_congestion_alert() {
        let m = monitor();
        let alerts = m.collect_alerts(75.0);
        assert!(
            alerts
                .iter()
                .any(|a| a.kind == AlertKind::NetworkCongestion)
        );
        assert!(m.collect_alerts(20.0).is_empty());
    }

    #[tokio::test]
    async fn test_min_pool_liquidity() {
        let m = monitor();
        assert!(m.min_pool_liquidity().is_none());
        m.record_liquidity("P1", 8_000.0);
        m.record_liquidity("P2", 3_000.0);
        assert_eq!(m.min_pool_liquidity(), Some(3_000.0));
    }

    #[tokio::test]
    async fn test_slow_slots_raise_congestion() {
        let blockchain = Arc::new(MockBlockchainAdapter::new());
        // Twice the expected 0.4s per slot.
        blockchain.set_slot_time(0.8);
        let m = MarketMonitor::new(
            MonitorConfig::default(),
            blockchain,
            Arc::new(CircuitBreakerRegistry::default()),
            EventBus::new(),
        );
        let condition = m.analyze_cycle().await;
        assert!(condition.congestion_pct > 50.0);
    }

    #[tokio::test]
    async fn test_healthy_slots_report_no_congestion() {
        let m = monitor();
        let condition = m.analyze_cycle().await;
        assert_eq!(condition.congestion_pct, 0.0);
    }

    #[tokio::test]
    async fn test_extreme_volatility_recommends_hold() {
        let m = monitor();
        for price in [1.0, 2.0, 0.5, 2.5, 0.4, 3.0] {
            m.record_price("T1", price);
        }
        let condition = m.condition(0.0);
        assert_eq!(condition.volatility, VolatilityBand::Extreme);
        assert_eq!(condition.recommended_action, RecommendedAction::Hold);
    }
}
