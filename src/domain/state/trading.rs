//! Per-candidate trading workflow machine.
//!
//! Owned exclusively by the trading coordinator's task, so no interior
//! synchronization is needed; the coordinator is the serial lane.

use crate::domain::errors::TransitionError;
use crate::domain::state::{StateHistory, TransitionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingState {
    Idle,
    EvaluatingPool,
    PreparingTrade,
    ExecutingTrade,
    ConfirmingTrade,
    TradeCompleted,
    TradeFailed,
    Error,
}

impl TradingState {
    pub fn name(self) -> &'static str {
        match self {
            TradingState::Idle => "IDLE",
            TradingState::EvaluatingPool => "EVALUATING_POOL",
            TradingState::PreparingTrade => "PREPARING_TRADE",
            TradingState::ExecutingTrade => "EXECUTING_TRADE",
            TradingState::ConfirmingTrade => "CONFIRMING_TRADE",
            TradingState::TradeCompleted => "TRADE_COMPLETED",
            TradingState::TradeFailed => "TRADE_FAILED",
            TradingState::Error => "ERROR",
        }
    }

    /// Terminal states leave only via RESET.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradingState::TradeCompleted | TradingState::TradeFailed | TradingState::Error
        )
    }
}

impl std::fmt::Display for TradingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradingTrigger {
    PoolDetected,
    EvaluationCompleted,
    TradePrepared,
    TradeSubmitted,
    TradeConfirmed,
    PreparationFailed { reason: String },
    SubmissionFailed { reason: String },
    ConfirmationFailed { reason: String },
    TradeTimeout,
    ErrorOccurred { error: String },
    Reset,
}

impl TradingTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            TradingTrigger::PoolDetected => "POOL_DETECTED",
            TradingTrigger::EvaluationCompleted => "EVALUATION_COMPLETED",
            TradingTrigger::TradePrepared => "TRADE_PREPARED",
            TradingTrigger::TradeSubmitted => "TRADE_SUBMITTED",
            TradingTrigger::TradeConfirmed => "TRADE_CONFIRMED",
            TradingTrigger::PreparationFailed { .. } => "PREPARATION_FAILED",
            TradingTrigger::SubmissionFailed { .. } => "SUBMISSION_FAILED",
            TradingTrigger::ConfirmationFailed { .. } => "CONFIRMATION_FAILED",
            TradingTrigger::TradeTimeout => "TRADE_TIMEOUT",
            TradingTrigger::ErrorOccurred { .. } => "ERROR_OCCURRED",
            TradingTrigger::Reset => "RESET",
        }
    }
}

/// Mutable context carried by one trading workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingStateContext {
    pub pool_address: Option<String>,
    pub token_address: Option<String>,
    pub trade_amount: Option<f64>,
    pub transaction_signature: Option<String>,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
}

pub struct TradingStateMachine {
    state: TradingState,
    context: TradingStateContext,
    history: StateHistory,
}

impl TradingStateMachine {
    pub fn new() -> Self {
        let mut history = StateHistory::new(HISTORY_CAPACITY);
        history.record("", TradingState::Idle.name(), "CREATED", false);
        Self {
            state: TradingState::Idle,
            context: TradingStateContext {
                start_time: Some(Utc::now()),
                ..Default::default()
            },
            history,
        }
    }

    pub fn state(&self) -> TradingState {
        self.state
    }

    pub fn context(&self) -> &TradingStateContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TradingStateContext {
        &mut self.context
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.snapshot()
    }

    fn target_for(&self, trigger: &TradingTrigger) -> Option<TradingState> {
        use TradingState as S;
        use TradingTrigger as T;

        // Failure triggers route any in-flight state to TRADE_FAILED.
        let failure = matches!(
            trigger,
            T::PreparationFailed { .. }
                | T::SubmissionFailed { .. }
                | T::ConfirmationFailed { .. }
                | T::TradeTimeout
        );
        if failure && !self.state.is_terminal() && self.state != S::Idle {
            return Some(S::TradeFailed);
        }

        // Terminals leave only via RESET.
        if let T::ErrorOccurred { .. } = trigger {
            if self.state.is_terminal() {
                return None;
            }
            return Some(S::Error);
        }

        match (self.state, trigger) {
            (S::Idle, T::PoolDetected) => Some(S::EvaluatingPool),
            (S::EvaluatingPool, T::EvaluationCompleted) => {
                // Guard: a tradeable evaluation carries token + amount.
                if self.context.token_address.is_some() && self.context.trade_amount.is_some() {
                    Some(S::PreparingTrade)
                } else {
                    Some(S::Idle)
                }
            }
            (S::PreparingTrade, T::TradePrepared) => Some(S::ExecutingTrade),
            (S::ExecutingTrade, T::TradeSubmitted) => Some(S::ConfirmingTrade),
            (S::ConfirmingTrade, T::TradeConfirmed) => Some(S::TradeCompleted),
            (S::TradeCompleted | S::TradeFailed | S::Error, T::Reset) => Some(S::Idle),
            _ => None,
        }
    }

    pub fn can_transition(&self, trigger: &TradingTrigger) -> bool {
        self.target_for(trigger).is_some()
    }

    pub fn transition(&mut self, trigger: TradingTrigger) -> Result<TradingState, TransitionError> {
        let from = self.state;
        let Some(to) = self.target_for(&trigger) else {
            if from.is_terminal() {
                return Err(TransitionError::Terminal {
                    state: from.name().to_string(),
                });
            }
            return Err(TransitionError::NoRule {
                from: from.name().to_string(),
                trigger: trigger.name().to_string(),
            });
        };

        match &trigger {
            TradingTrigger::PreparationFailed { reason }
            | TradingTrigger::SubmissionFailed { reason }
            | TradingTrigger::ConfirmationFailed { reason } => {
                self.context.error = Some(reason.clone());
            }
            TradingTrigger::TradeTimeout => {
                self.context.error = Some("confirmation timeout".to_string());
            }
            TradingTrigger::ErrorOccurred { error } => {
                self.context.error = Some(error.clone());
            }
            TradingTrigger::Reset => {
                self.context = TradingStateContext {
                    start_time: Some(Utc::now()),
                    ..Default::default()
                };
            }
            _ => {}
        }

        self.state = to;
        self.context.last_transition = Some(Utc::now());
        self.history
            .record(from.name(), to.name(), trigger.name(), false);
        Ok(to)
    }

    /// Operator escape hatch; bypasses guards, keeps history coherent.
    pub fn force_state(&mut self, to: TradingState, reason: &str) -> TradingState {
        let from = self.state;
        self.state = to;
        self.history
            .record(from.name(), to.name(), format!("FORCED:{reason}"), true);
        from
    }
}

impl Default for TradingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
