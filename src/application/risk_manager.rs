//! Portfolio risk scoring and trade admission control.
//!
//! Four normalized sub-scores (exposure, correlation, volatility,
//! liquidity) are combined into one 0-100 score each assessment cycle.
//! `assess_trade_risk` gates every pending trade before the trading
//! coordinator commits to it.

use crate::domain::events::BotEvent;
use crate::domain::rolling::{RollingSeries, pearson_correlation};
use crate::domain::types::{Alert, AlertKind, AlertSeverity, TradeDecision};
use crate::infrastructure::event_bus::EventBus;
use chrono::Duration as ChronoDuration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_total_exposure_usd: f64,
    pub max_single_position_usd: f64,
    pub max_daily_loss_usd: f64,
    pub max_drawdown_percent: f64,
    /// |ρ| above this counts as correlated.
    pub correlation_threshold: f64,
    /// Share of total exposure in one token that trips the alert.
    pub concentration_threshold_pct: f64,
    pub assessment_interval: Duration,
    /// Rolling price window feeding correlation and volatility.
    pub price_window_minutes: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_exposure_usd: 1000.0,
            max_single_position_usd: 500.0,
            max_daily_loss_usd: 200.0,
            max_drawdown_percent: 25.0,
            correlation_threshold: 0.7,
            concentration_threshold_pct: 50.0,
            assessment_interval: Duration::from_secs(30),
            price_window_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::Critical
        } else if score >= 60.0 {
            RiskLevel::High
        } else if score >= 40.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub exposure_score: f64,
    pub correlation_score: f64,
    pub volatility_score: f64,
    pub liquidity_score: f64,
    pub recommendations: Vec<String>,
}

/// Verdict on one pending trade.
#[derive(Debug, Clone)]
pub struct TradeRiskGate {
    pub approved: bool,
    pub risk_score: f64,
    pub reason: Option<String>,
}

struct RiskState {
    /// USD exposure per token.
    exposures: HashMap<String, f64>,
    price_series: HashMap<String, RollingSeries<f64>>,
    min_pool_liquidity_usd: Option<f64>,
    daily_pnl_usd: f64,
    equity_high_water_usd: f64,
    realized_equity_usd: f64,
}

pub struct RiskManager {
    config: RiskConfig,
    state: RwLock<RiskState>,
    bus: EventBus,
}

impl RiskManager {
    pub fn new(config: RiskConfig, bus: EventBus) -> Self {
        Self {
            config,
            state: RwLock::new(RiskState {
                exposures: HashMap::new(),
                price_series: HashMap::new(),
                min_pool_liquidity_usd: None,
                daily_pnl_usd: 0.0,
                equity_high_water_usd: 0.0,
                realized_equity_usd: 0.0,
            }),
            bus,
        }
    }

    pub fn record_price(&self, token: &str, price: f64) {
        if !crate::domain::types::is_valid_price(price) {
            return;
        }
        let window = ChronoDuration::minutes(self.config.price_window_minutes);
        let mut state = self.state.write();
        state
            .price_series
            .entry(token.to_string())
            .or_insert_with(|| RollingSeries::new(window, 1800))
            .push_now(price);
    }

    pub fn set_exposure(&self, token: &str, value_usd: f64) {
        self.state
            .write()
            .exposures
            .insert(token.to_string(), value_usd.max(0.0));
    }

    pub fn remove_exposure(&self, token: &str) {
        self.state.write().exposures.remove(token);
    }

    pub fn set_min_pool_liquidity(&self, liquidity_usd: f64) {
        self.state.write().min_pool_liquidity_usd = Some(liquidity_usd);
    }

    pub fn record_trade_pnl(&self, pnl_usd: f64) {
        let mut state = self.state.write();
        state.daily_pnl_usd += pnl_usd;
        state.realized_equity_usd += pnl_usd;
        if state.realized_equity_usd > state.equity_high_water_usd {
            state.equity_high_water_usd = state.realized_equity_usd;
        }
    }

    pub fn total_exposure_usd(&self) -> f64 {
        self.state.read().exposures.values().sum()
    }

    /// Full assessment over the current portfolio. Publishes threshold
    /// alerts as a side effect.
    pub fn assess(&self) -> RiskAssessment {
        let state = self.state.read();

        let exposure_score = self.exposure_score(&state);
        let correlation_score = self.correlation_score(&state);
        let volatility_score = self.volatility_score(&state);
        let liquidity_score = self.liquidity_score(&state);

        let risk_score = 0.30 * exposure_score
            + 0.25 * correlation_score
            + 0.25 * volatility_score
            + 0.20 * (100.0 - liquidity_score);
        let risk_level = RiskLevel::from_score(risk_score);

        let mut recommendations = Vec::new();
        if exposure_score >= 80.0 {
            recommendations.push("reduce total exposure".to_string());
        }
        if correlation_score >= 60.0 {
            recommendations.push("diversify correlated positions".to_string());
        }
        if volatility_score >= 50.0 {
            recommendations.push("tighten stops in extreme volatility".to_string());
        }
        if liquidity_score <= 20.0 {
            recommendations.push("avoid thin pools".to_string());
        }

        self.publish_threshold_alerts(&state);

        debug!(
            "RiskManager: score={:.1} ({:?}) E={:.1} C={:.1} V={:.1} L={:.1}",
            risk_score,
            risk_level,
            exposure_score,
            correlation_score,
            volatility_score,
            liquidity_score
        );

        RiskAssessment {
            risk_score,
            risk_level,
            exposure_score,
            correlation_score,
            volatility_score,
            liquidity_score,
            recommendations,
        }
    }

    /// Gate one pending trade against the position caps.
    pub fn assess_trade_risk(&self, decision: &TradeDecision) -> TradeRiskGate {
        let total = self.total_exposure_usd();
        let amount = decision.trade_amount_usd;

        if amount > self.config.max_single_position_usd {
            let reason = format!(
                "trade ${:.0} exceeds single-position cap ${:.0}",
                amount, self.config.max_single_position_usd
            );
            self.emit_exposure_alert(&reason, decision);
            return TradeRiskGate {
                approved: false,
                risk_score: 100.0,
                reason: Some(reason),
            };
        }

        if total + amount > self.config.max_total_exposure_usd {
            let reason = format!(
                "trade ${:.0} would push exposure to ${:.0} (cap ${:.0})",
                amount,
                total + amount,
                self.config.max_total_exposure_usd
            );
            self.emit_exposure_alert(&reason, decision);
            return TradeRiskGate {
                approved: false,
                risk_score: 100.0,
                reason: Some(reason),
            };
        }

        let assessment = self.assess();
        TradeRiskGate {
            approved: true,
            risk_score: assessment.risk_score,
            reason: None,
        }
    }

    /// Periodic assessment loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("RiskManager: assessment loop started");
        let mut interval = tokio::time::interval(self.config.assessment_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let assessment = self.assess();
                    if assessment.risk_level >= RiskLevel::High {
                        warn!(
                            "RiskManager: portfolio risk {:?} ({:.1})",
                            assessment.risk_level, assessment.risk_score
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("RiskManager: assessment loop stopped");
                        return;
                    }
                }
            }
        }
    }

    fn exposure_score(&self, state: &RiskState) -> f64 {
        let total: f64 = state.exposures.values().sum();
        if self.config.max_total_exposure_usd <= 0.0 {
            return 100.0;
        }
        (total / self.config.max_total_exposure_usd * 100.0).clamp(0.0, 100.0)
    }

    fn correlation_score(&self, state: &RiskState) -> f64 {
        let tokens: Vec<&String> = state
            .exposures
            .keys()
            .filter(|t| state.price_series.contains_key(*t))
            .collect();
        let total: f64 = state.exposures.values().sum();
        if tokens.len() < 2 || total <= 0.0 {
            return 0.0;
        }

        let mut score = 0.0;
        for i in 0..tokens.len() {
            for j in (i + 1)..tokens.len() {
                let (a, b) = (tokens[i], tokens[j]);
                let Some(rho) = pearson_correlation(&state.price_series[a], &state.price_series[b])
                else {
                    continue;
                };
                if rho.abs() > self.config.correlation_threshold {
                    // Weight by the pair's share of total exposure.
                    let joint_share = (state.exposures[a] + state.exposures[b]) / (2.0 * total);
                    score += rho.abs() * joint_share * 100.0;
                }
            }
        }
        score.clamp(0.0, 100.0)
    }

    fn volatility_score(&self, state: &RiskState) -> f64 {
        let vols: Vec<f64> = state
            .exposures
            .keys()
            .filter_map(|token| state.price_series.get(token))
            .filter_map(|series| series.return_volatility())
            .map(|sigma| (sigma * 100.0).min(100.0))
            .collect();
        if vols.is_empty() {
            return 0.0;
        }
        vols.iter().sum::<f64>() / vols.len() as f64
    }

    /// Higher is better; $10k pool liquidity maps to 100.
    fn liquidity_score(&self, state: &RiskState) -> f64 {
        match state.min_pool_liquidity_usd {
            Some(liquidity) => (liquidity / 10_000.0 * 100.0).clamp(0.0, 100.0),
            None => 50.0,
        }
    }

    fn publish_threshold_alerts(&self, state: &RiskState) {
        if state.daily_pnl_usd <= -self.config.max_daily_loss_usd {
            self.bus.publish(BotEvent::Alert(Alert::new(
                AlertKind::DailyLossLimit,
                AlertSeverity::Critical,
                format!(
                    "daily loss ${:.0} breached limit ${:.0}",
                    -state.daily_pnl_usd, self.config.max_daily_loss_usd
                ),
            )));
        }

        if state.equity_high_water_usd > 0.0 {
            let drawdown_pct = (state.equity_high_water_usd - state.realized_equity_usd)
                / state.equity_high_water_usd
                * 100.0;
            if drawdown_pct >= self.config.max_drawdown_percent {
                self.bus.publish(BotEvent::Alert(Alert::new(
                    AlertKind::DrawdownLimit,
                    AlertSeverity::Critical,
                    format!("drawdown {drawdown_pct:.1}% breached limit"),
                )));
            }
        }

        let total: f64 = state.exposures.values().sum();
        if total > 0.0 {
            for (token, exposure) in &state.exposures {
                let share = exposure / total * 100.0;
                if share >= self.config.concentration_threshold_pct {
                    self.bus.publish(BotEvent::Alert(
                        Alert::new(
                            AlertKind::ConcentrationRisk,
                            AlertSeverity::Warning,
                            format!("{share:.0}% of exposure concentrated in one token"),
                        )
                        .with_token(token.clone()),
                    ));
                }
            }
        }

        let correlation = self.correlation_score(state);
        if correlation >= 50.0 {
            self.bus.publish(BotEvent::Alert(Alert::new(
                AlertKind::CorrelationRisk,
                AlertSeverity::Warning,
                format!("correlated exposure score {correlation:.0}"),
            )));
        }
        if total > self.config.max_total_exposure_usd {
            self.bus.publish(BotEvent::Alert(Alert::new(
                AlertKind::ExposureLimit,
                AlertSeverity::Critical,
                format!(
                    "exposure ${total:.0} above cap ${:.0}",
                    self.config.max_total_exposure_usd
                ),
            )));
        }
    }

    fn emit_exposure_alert(&self, reason: &str, decision: &TradeDecision) {
        warn!("RiskManager: trade refused: {reason}");
        self.bus.publish(BotEvent::Alert(
            Alert::new(AlertKind::ExposureLimit, AlertSeverity::Critical, reason)
                .with_token(decision.target_token.clone())
                .with_pool(decision.pool_address.clone()),
        ));
    }
}
