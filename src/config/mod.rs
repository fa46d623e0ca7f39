//! Configuration loading.
//!
//! Settings come from an optional TOML file (path in `SNIPEBOT_CONFIG`)
//! with environment-variable overrides on top, then are validated once at
//! startup. Every subsystem receives a typed view of this struct; nothing
//! reads the environment after boot.

use crate::application::exit_strategies::ExitStrategy;
use crate::application::market_monitor::MonitorConfig;
use crate::application::position_coordinator::PositionCoordinatorConfig;
use crate::application::risk_manager::RiskConfig;
use crate::application::slippage::SlippageConfig;
use crate::application::trading_coordinator::TradingCoordinatorConfig;
use crate::infrastructure::circuit_breaker::CircuitBreakerConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub http_url: String,
    pub ws_url: String,
    pub connection_timeout_secs: u64,
    pub commitment: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            http_url: String::new(),
            ws_url: String::new(),
            connection_timeout_secs: 30,
            commitment: "confirmed".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    pub risk_percent: f64,
    pub max_total_risk_percent: f64,
    pub confirmation_required: bool,
    pub excluded_tokens: Vec<String>,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            risk_percent: 5.0,
            max_total_risk_percent: 20.0,
            confirmation_required: false,
            excluded_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeSettings {
    pub min_liquidity_usd: f64,
    pub max_slippage_percent: f64,
    pub default_trade_amount_usd: f64,
    pub max_trade_amount_usd: f64,
    pub min_token_price: Option<f64>,
    pub max_token_supply: Option<f64>,
    pub max_holding_time_minutes: i64,
    pub required_base_tokens: Vec<String>,
    pub min_pool_age_seconds: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 1000.0,
            max_slippage_percent: 2.0,
            default_trade_amount_usd: 100.0,
            max_trade_amount_usd: 1000.0,
            min_token_price: None,
            max_token_supply: None,
            max_holding_time_minutes: 1440,
            required_base_tokens: Vec::new(),
            min_pool_age_seconds: 5,
            confirmation_timeout_secs: 30,
        }
    }
}

/// One configured exit strategy with its enable flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitStrategyEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub strategy: ExitStrategy,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub timeout_secs: u64,
    pub monitoring_period_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60,
            monitoring_period_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub price_volatility_threshold: f64,
    pub volume_spike_multiplier: f64,
    pub liquidity_drop_threshold: f64,
    pub monitoring_interval_secs: u64,
    pub historical_data_window_minutes: i64,
    pub expected_slot_time_secs: f64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            price_volatility_threshold: 10.0,
            volume_spike_multiplier: 3.0,
            liquidity_drop_threshold: 0.3,
            monitoring_interval_secs: 30,
            historical_data_window_minutes: 30,
            expected_slot_time_secs: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub max_total_exposure_usd: f64,
    pub max_single_position_usd: f64,
    pub max_daily_loss_usd: f64,
    pub max_drawdown_percent: f64,
    pub correlation_threshold: f64,
    pub concentration_threshold_pct: f64,
    pub assessment_interval_secs: u64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_total_exposure_usd: 1000.0,
            max_single_position_usd: 500.0,
            max_daily_loss_usd: 200.0,
            max_drawdown_percent: 25.0,
            correlation_threshold: 0.7,
            concentration_threshold_pct: 50.0,
            assessment_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc: RpcSettings,
    pub wallet: WalletSettings,
    pub trade: TradeSettings,
    pub exit_strategies: Vec<ExitStrategyEntry>,
    pub circuit_breaker: CircuitBreakerSettings,
    pub monitoring: MonitoringSettings,
    pub risk: RiskSettings,
    pub polling_interval_secs: u64,
    pub dry_run: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcSettings::default(),
            wallet: WalletSettings::default(),
            trade: TradeSettings::default(),
            exit_strategies: vec![
                ExitStrategyEntry {
                    enabled: true,
                    strategy: ExitStrategy::Profit {
                        target_percent: 50.0,
                        trailing_stop_percent: None,
                        partial_exit_percent: None,
                    },
                },
                ExitStrategyEntry {
                    enabled: true,
                    strategy: ExitStrategy::Loss { stop_percent: 20.0 },
                },
                ExitStrategyEntry {
                    enabled: true,
                    strategy: ExitStrategy::Time {
                        max_holding_minutes: 1440,
                    },
                },
                ExitStrategyEntry {
                    enabled: true,
                    strategy: ExitStrategy::Liquidity { drop_percent: 50.0 },
                },
                ExitStrategyEntry {
                    enabled: false,
                    strategy: ExitStrategy::DeveloperActivity,
                },
            ],
            circuit_breaker: CircuitBreakerSettings::default(),
            monitoring: MonitoringSettings::default(),
            risk: RiskSettings::default(),
            polling_interval_secs: 1,
            dry_run: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from the optional TOML file, then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("SNIPEBOT_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {path}"))?
            }
            Err(_) => Config::default(),
        };

        if let Ok(url) = env::var("RPC_HTTP_URL") {
            config.rpc.http_url = url;
        }
        if let Ok(url) = env::var("RPC_WS_URL") {
            config.rpc.ws_url = url;
        }
        if let Ok(value) = env::var("DRY_RUN") {
            config.dry_run = value.eq_ignore_ascii_case("true") || value == "1";
        }
        if let Ok(value) = env::var("LOG_LEVEL") {
            config.log_level = value;
        }
        if let Ok(value) = env::var("POLLING_INTERVAL_SECS") {
            config.polling_interval_secs = value
                .parse()
                .context("POLLING_INTERVAL_SECS must be an integer")?;
        }
        if let Ok(value) = env::var("DEFAULT_TRADE_AMOUNT_USD") {
            config.trade.default_trade_amount_usd = value
                .parse()
                .context("DEFAULT_TRADE_AMOUNT_USD must be a number")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc.http_url.is_empty() {
            bail!("rpc.http_url is required");
        }
        if self.rpc.ws_url.is_empty() {
            bail!("rpc.ws_url is required");
        }
        if self.trade.default_trade_amount_usd <= 0.0 {
            bail!("trade.default_trade_amount_usd must be positive");
        }
        if self.trade.max_trade_amount_usd < self.trade.default_trade_amount_usd {
            bail!("trade.max_trade_amount_usd below default trade amount");
        }
        if self.trade.max_slippage_percent <= 0.0 {
            bail!("trade.max_slippage_percent must be positive");
        }
        if self.polling_interval_secs == 0 {
            bail!("polling_interval_secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.monitoring.liquidity_drop_threshold) {
            bail!("monitoring.liquidity_drop_threshold must be within [0, 1]");
        }
        Ok(())
    }

    pub fn enabled_exit_strategies(&self) -> Vec<ExitStrategy> {
        self.exit_strategies
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.strategy.clone())
            .collect()
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_total_exposure_usd: self.risk.max_total_exposure_usd,
            max_single_position_usd: self.risk.max_single_position_usd,
            max_daily_loss_usd: self.risk.max_daily_loss_usd,
            max_drawdown_percent: self.risk.max_drawdown_percent,
            correlation_threshold: self.risk.correlation_threshold,
            concentration_threshold_pct: self.risk.concentration_threshold_pct,
            assessment_interval: Duration::from_secs(self.risk.assessment_interval_secs),
            price_window_minutes: self.monitoring.historical_data_window_minutes,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            price_volatility_threshold: self.monitoring.price_volatility_threshold,
            volume_spike_multiplier: self.monitoring.volume_spike_multiplier,
            liquidity_drop_threshold: self.monitoring.liquidity_drop_threshold,
            monitoring_interval: Duration::from_secs(self.monitoring.monitoring_interval_secs),
            data_window_minutes: self.monitoring.historical_data_window_minutes,
            expected_slot_time_secs: self.monitoring.expected_slot_time_secs,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            success_threshold: self.circuit_breaker.success_threshold,
            timeout: Duration::from_secs(self.circuit_breaker.timeout_secs),
            monitoring_period: Duration::from_secs(self.circuit_breaker.monitoring_period_secs),
        }
    }

    pub fn slippage_config(&self) -> SlippageConfig {
        SlippageConfig {
            base_percent: self.trade.max_slippage_percent,
            min_liquidity_usd: self.trade.min_liquidity_usd,
            ..SlippageConfig::default()
        }
    }

    pub fn trading_coordinator_config(&self) -> TradingCoordinatorConfig {
        TradingCoordinatorConfig {
            dry_run: self.dry_run,
            confirmation_timeout: Duration::from_secs(self.trade.confirmation_timeout_secs),
        }
    }

    pub fn position_coordinator_config(&self) -> PositionCoordinatorConfig {
        PositionCoordinatorConfig {
            polling_interval: Duration::from_secs(self.polling_interval_secs),
            confirmation_required: self.wallet.confirmation_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            rpc: RpcSettings {
                http_url: "http://localhost:8899".into(),
                ws_url: "ws://localhost:8900".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.wallet.risk_percent, 5.0);
        assert_eq!(config.trade.min_liquidity_usd, 1000.0);
        assert_eq!(config.trade.default_trade_amount_usd, 100.0);
        assert_eq!(config.trade.max_holding_time_minutes, 1440);
        assert_eq!(config.polling_interval_secs, 1);
        assert!(!config.dry_run);
        assert_eq!(config.rpc.reconnect.max_retries, 5);
    }

    #[test]
    fn test_validation_requires_rpc_urls() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_amounts() {
        let mut config = valid_config();
        config.trade.max_trade_amount_usd = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_strategies_filtered() {
        let config = Config::default();
        let enabled = config.enabled_exit_strategies();
        // Developer-activity ships disabled by default.
        assert_eq!(enabled.len(), 4);
        assert!(!enabled.contains(&ExitStrategy::DeveloperActivity));
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            polling_interval_secs = 2
            dry_run = true

            [rpc]
            http_url = "http://localhost:8899"
            ws_url = "ws://localhost:8900"

            [trade]
            default_trade_amount_usd = 250.0
            max_trade_amount_usd = 500.0

            [[exit_strategies]]
            type = "profit"
            target_percent = 40.0

            [[exit_strategies]]
            enabled = false
            type = "loss"
            stop_percent = 15.0
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.trade.default_trade_amount_usd, 250.0);
        assert_eq!(config.exit_strategies.len(), 2);
        assert_eq!(config.enabled_exit_strategies().len(), 1);
        config.validate().unwrap();
    }
}
