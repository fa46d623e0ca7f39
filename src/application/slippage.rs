//! Dynamic slippage tolerance.
//!
//! The recommendation starts from a configured base and widens with
//! overall volatility, estimated market impact and thin liquidity, clamped
//! to a hard ceiling. When the market is broken (breaker tripped, extreme
//! volatility, drained liquidity) the adaptive limit overrides everything
//! with the emergency setting.

use serde::{Deserialize, Serialize};

/// Cap on the square-root impact model, in percent.
const MAX_IMPACT_PCT: f64 = 15.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageConfig {
    /// Starting tolerance in percent.
    pub base_percent: f64,
    /// Hard ceiling in percent.
    pub max_percent: f64,
    /// Percent added per unit of overall return volatility.
    pub volatility_multiplier: f64,
    /// Impact below this percentage is absorbed silently.
    pub impact_threshold_percent: f64,
    /// Tolerance used while in emergency mode.
    pub emergency_percent: f64,
    /// Pools under this liquidity get a flat penalty.
    pub min_liquidity_usd: f64,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            base_percent: 2.0,
            max_percent: 10.0,
            volatility_multiplier: 5.0,
            impact_threshold_percent: 1.0,
            emergency_percent: 25.0,
            min_liquidity_usd: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlippageMode {
    Normal,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageRecommendation {
    pub percent: f64,
    pub mode: SlippageMode,
    pub estimated_impact_percent: f64,
}

pub struct SlippageProtection {
    config: SlippageConfig,
}

impl SlippageProtection {
    pub fn new(config: SlippageConfig) -> Self {
        Self { config }
    }

    /// Square-root market impact model, in percent of trade value.
    ///
    /// `sqrt(trade/liquidity) * 0.1`, scaled for pool size: tiny pools
    /// amplify impact, deep pools dampen it. Capped at 15 %.
    pub fn estimated_impact_percent(&self, trade_usd: f64, pool_liquidity_usd: f64) -> f64 {
        if pool_liquidity_usd <= 0.0 || trade_usd <= 0.0 {
            return MAX_IMPACT_PCT;
        }
        let raw = (trade_usd / pool_liquidity_usd).sqrt() * 0.1 * 100.0;
        let multiplier = match pool_liquidity_usd {
            l if l < 10_000.0 => 1.5,
            l if l < 50_000.0 => 1.2,
            l if l > 500_000.0 => 0.8,
            _ => 1.0,
        };
        (raw * multiplier).min(MAX_IMPACT_PCT)
    }

    /// Recommended tolerance for one trade under normal conditions.
    pub fn recommended_percent(
        &self,
        trade_usd: f64,
        pool_liquidity_usd: f64,
        overall_volatility: f64,
    ) -> f64 {
        let cfg = &self.config;
        let impact = self.estimated_impact_percent(trade_usd, pool_liquidity_usd);

        let liquidity_penalty = if pool_liquidity_usd < cfg.min_liquidity_usd {
            1.0
        } else {
            0.0
        };
        // Trades above a tenth of the pool carry outsized execution risk.
        let size_risk_penalty = if pool_liquidity_usd > 0.0 {
            let ratio = trade_usd / pool_liquidity_usd;
            if ratio > 0.10 {
                2.0
            } else if ratio > 0.05 {
                1.0
            } else {
                0.0
            }
        } else {
            2.0
        };

        let recommended = cfg.base_percent
            + cfg.volatility_multiplier * overall_volatility.max(0.0)
            + (impact - cfg.impact_threshold_percent).max(0.0)
            + liquidity_penalty
            + size_risk_penalty;

        recommended.clamp(cfg.base_percent * 0.5, cfg.max_percent)
    }

    /// Final per-trade limit, applying the emergency override.
    pub fn adaptive_limit(
        &self,
        trade_usd: f64,
        pool_liquidity_usd: f64,
        overall_volatility: f64,
        breaker_tripped: bool,
    ) -> SlippageRecommendation {
        let emergency = breaker_tripped
            || overall_volatility > 0.8
            || pool_liquidity_usd < self.config.min_liquidity_usd * 0.1;

        let impact = self.estimated_impact_percent(trade_usd, pool_liquidity_usd);
        if emergency {
            return SlippageRecommendation {
                percent: self.config.emergency_percent,
                mode: SlippageMode::Emergency,
                estimated_impact_percent: impact,
            };
        }
        SlippageRecommendation {
            percent: self.recommended_percent(trade_usd, pool_liquidity_usd, overall_volatility),
            mode: SlippageMode::Normal,
            estimated_impact_percent: impact,
        }
    }
}
