//! Pluggable exit conditions evaluated against a live position.
//!
//! Each strategy is a pure predicate: given the evaluation context it
//! either triggers with a reason and urgency or stays silent. When several
//! trigger in the same cycle the most protective one wins:
//! liquidity > loss > developer > time > profit.

use crate::domain::position::PositionContext;
use crate::domain::types::{ExitSignal, ExitUrgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inputs for one evaluation pass, assembled by the position coordinator.
#[derive(Debug, Clone)]
pub struct ExitEvaluation<'a> {
    pub position: &'a PositionContext,
    pub now: DateTime<Utc>,
    /// Highest price observed since entry; drives trailing stops.
    pub peak_price: Option<f64>,
    pub initial_liquidity_usd: Option<f64>,
    pub current_liquidity_usd: Option<f64>,
    /// External signal: the token deployer moved or sold holdings.
    pub developer_sold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExitStrategy {
    Profit {
        /// Trigger once PnL reaches this percentage.
        target_percent: f64,
        /// When set, arm at the target and exit only after price falls
        /// this far from its peak.
        trailing_stop_percent: Option<f64>,
        /// Fraction of the position to exit, full exit when absent.
        partial_exit_percent: Option<f64>,
    },
    Loss {
        /// Trigger once PnL falls to or below minus this percentage.
        stop_percent: f64,
    },
    Time {
        max_holding_minutes: i64,
    },
    Liquidity {
        /// Trigger when pool liquidity drops this far below its initial
        /// value, in percent.
        drop_percent: f64,
    },
    DeveloperActivity,
}

impl ExitStrategy {
    /// Protection ordering; higher wins when several strategies trigger.
    pub fn priority(&self) -> u8 {
        match self {
            ExitStrategy::Liquidity { .. } => 5,
            ExitStrategy::Loss { .. } => 4,
            ExitStrategy::DeveloperActivity => 3,
            ExitStrategy::Time { .. } => 2,
            ExitStrategy::Profit { .. } => 1,
        }
    }

    pub fn evaluate(&self, eval: &ExitEvaluation<'_>) -> Option<ExitSignal> {
        match self {
            ExitStrategy::Profit {
                target_percent,
                trailing_stop_percent,
                partial_exit_percent,
            } => {
                let pnl = eval.position.pnl_percent?;
                match trailing_stop_percent {
                    None => {
                        if pnl >= *target_percent {
                            Some(ExitSignal {
                                reason: "profit target".to_string(),
                                urgency: ExitUrgency::Medium,
                                partial_exit_percentage: *partial_exit_percent,
                            })
                        } else {
                            None
                        }
                    }
                    Some(trailing) => {
                        // Armed only after the target was reached at peak.
                        let peak = eval.peak_price?;
                        let current = eval.position.current_price?;
                        let entry = eval.position.entry_price;
                        if entry <= 0.0 || peak <= 0.0 {
                            return None;
                        }
                        let peak_pnl = (peak - entry) / entry * 100.0;
                        if peak_pnl < *target_percent {
                            return None;
                        }
                        let retrace = (peak - current) / peak * 100.0;
                        if retrace >= *trailing {
                            Some(ExitSignal {
                                reason: "trailing stop".to_string(),
                                urgency: ExitUrgency::High,
                                partial_exit_percentage: *partial_exit_percent,
                            })
                        } else {
                            None
                        }
                    }
                }
            }
            ExitStrategy::Loss { stop_percent } => {
                let pnl = eval.position.pnl_percent?;
                if pnl <= -stop_percent.abs() {
                    Some(ExitSignal {
                        reason: "stop loss".to_string(),
                        urgency: ExitUrgency::High,
                        partial_exit_percentage: None,
                    })
                } else {
                    None
                }
            }
            ExitStrategy::Time {
                max_holding_minutes,
            } => {
                if eval.position.holding_time_minutes(eval.now) >= *max_holding_minutes {
                    Some(ExitSignal {
                        reason: "max holding time".to_string(),
                        urgency: ExitUrgency::Medium,
                        partial_exit_percentage: None,
                    })
                } else {
                    None
                }
            }
            ExitStrategy::Liquidity { drop_percent } => {
                let initial = eval.initial_liquidity_usd?;
                let current = eval.current_liquidity_usd?;
                if initial <= 0.0 {
                    return None;
                }
                let drop = (initial - current) / initial * 100.0;
                if drop >= *drop_percent {
                    Some(ExitSignal {
                        reason: "liquidity drop".to_string(),
                        urgency: ExitUrgency::Immediate,
                        partial_exit_percentage: None,
                    })
                } else {
                    None
                }
            }
            ExitStrategy::DeveloperActivity => {
                if eval.developer_sold {
                    Some(ExitSignal {
                        reason: "developer activity".to_string(),
                        urgency: ExitUrgency::High,
                        partial_exit_percentage: None,
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Evaluate all enabled strategies; the highest-priority trigger wins.
pub fn evaluate_all(strategies: &[ExitStrategy], eval: &ExitEvaluation<'_>) -> Option<ExitSignal> {
    strategies
        .iter()
        .filter_map(|s| s.evaluate(eval).map(|signal| (s.priority(), signal)))
        .max_by_key(|(priority, _)| *priority)
        .map(|(_, signal)| signal)
}
