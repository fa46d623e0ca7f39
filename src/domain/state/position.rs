//! Position lifecycle machine with an atomic state word.
//!
//! Price ticks, exit evaluations and operator commands race on the same
//! position. Two properties must hold no matter the interleaving:
//!
//! - exactly one transition wins a race; the loser reports failure without
//!   touching context or history;
//! - PnL reads never tear: {current_price, last_price_update, pnl_percent,
//!   pnl_usd} always form a consistent quadruple.
//!
//! The current state lives in an `AtomicU8` readable from any task without
//! locks. A transition serializes on a small mutex, re-reads the word,
//! applies the rule table, then publishes via compare-and-swap. Context
//! writes happen under `parking_lot::Mutex` and stay short.

use crate::domain::errors::TransitionError;
use crate::domain::position::PositionContext;
use crate::domain::state::{StateHistory, TransitionRecord};
use crate::domain::types::is_valid_price;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

const HISTORY_CAPACITY: usize = 50;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    Created = 0,
    Monitoring = 1,
    ExitPending = 2,
    Exiting = 3,
    Closed = 4,
    Error = 5,
    Paused = 6,
}

impl PositionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PositionState::Created,
            1 => PositionState::Monitoring,
            2 => PositionState::ExitPending,
            3 => PositionState::Exiting,
            4 => PositionState::Closed,
            5 => PositionState::Error,
            6 => PositionState::Paused,
            other => unreachable!("invalid position state word {other}"),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PositionState::Closed
    }

    pub fn name(self) -> &'static str {
        match self {
            PositionState::Created => "CREATED",
            PositionState::Monitoring => "MONITORING",
            PositionState::ExitPending => "EXIT_PENDING",
            PositionState::Exiting => "EXITING",
            PositionState::Closed => "CLOSED",
            PositionState::Error => "ERROR",
            PositionState::Paused => "PAUSED",
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionTrigger {
    PositionOpened,
    ExitConditionMet { reason: String },
    ManualExitRequested,
    PauseRequested,
    ExitApproved,
    ExitRejected,
    ExitCompleted,
    ExitFailed { reason: String },
    ResumeRequested,
    RecoveryCompleted,
    ErrorOccurred { error: String },
}

impl PositionTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            PositionTrigger::PositionOpened => "POSITION_OPENED",
            PositionTrigger::ExitConditionMet { .. } => "EXIT_CONDITION_MET",
            PositionTrigger::ManualExitRequested => "MANUAL_EXIT_REQUESTED",
            PositionTrigger::PauseRequested => "PAUSE_REQUESTED",
            PositionTrigger::ExitApproved => "EXIT_APPROVED",
            PositionTrigger::ExitRejected => "EXIT_REJECTED",
            PositionTrigger::ExitCompleted => "EXIT_COMPLETED",
            PositionTrigger::ExitFailed { .. } => "EXIT_FAILED",
            PositionTrigger::ResumeRequested => "RESUME_REQUESTED",
            PositionTrigger::RecoveryCompleted => "RECOVERY_COMPLETED",
            PositionTrigger::ErrorOccurred { .. } => "ERROR_OCCURRED",
        }
    }
}

/// What a rule lookup yields for a (state, trigger) pair.
enum Rule {
    /// Transition to the target state.
    Move(PositionState),
    /// Accepted but nothing changes (idempotent re-delivery).
    Ignore,
    /// No rule; the trigger is rejected in this state.
    Reject,
}

fn rule_for(state: PositionState, trigger: &PositionTrigger) -> Rule {
    use PositionState as S;
    use PositionTrigger as T;

    // ERROR_OCCURRED is accepted from every non-terminal, non-error state.
    if let T::ErrorOccurred { .. } = trigger {
        return match state {
            S::Error | S::Closed => Rule::Reject,
            _ => Rule::Move(S::Error),
        };
    }

    match (state, trigger) {
        (S::Created, T::PositionOpened) => Rule::Move(S::Monitoring),

        (S::Monitoring, T::ExitConditionMet { .. }) => Rule::Move(S::ExitPending),
        (S::Monitoring, T::ManualExitRequested) => Rule::Move(S::ExitPending),
        (S::Monitoring, T::PauseRequested) => Rule::Move(S::Paused),

        (S::ExitPending, T::ExitApproved) => Rule::Move(S::Exiting),
        (S::ExitPending, T::ExitRejected) => Rule::Move(S::Monitoring),
        (S::ExitPending, T::ManualExitRequested) => Rule::Ignore,
        (S::ExitPending, T::ExitConditionMet { .. }) => Rule::Ignore,
        (S::ExitPending, T::PauseRequested) => Rule::Ignore,

        (S::Exiting, T::ExitCompleted) => Rule::Move(S::Closed),
        (S::Exiting, T::ExitFailed { .. }) => Rule::Move(S::Error),
        (S::Exiting, T::ExitConditionMet { .. }) => Rule::Ignore,
        (S::Exiting, T::ManualExitRequested) => Rule::Ignore,

        (S::Paused, T::ResumeRequested) => Rule::Move(S::Monitoring),
        (S::Paused, T::ManualExitRequested) => Rule::Move(S::ExitPending),
        (S::Paused, T::PauseRequested) => Rule::Ignore,

        (S::Error, T::RecoveryCompleted) => Rule::Move(S::Monitoring),
        // Force-close escape hatch out of ERROR.
        (S::Error, T::ExitCompleted) => Rule::Move(S::Closed),

        _ => Rule::Reject,
    }
}

/// Outcome of a successful `transition` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The state word changed to the contained state.
    Changed(PositionState),
    /// The trigger was accepted but idempotent; nothing changed.
    Ignored,
}

pub struct PositionStateMachine {
    /// Lock-free observable state word.
    state: AtomicU8,
    context: Mutex<PositionContext>,
    history: Mutex<StateHistory>,
    /// Serializes transitions; never held during price reads.
    transition_lock: Mutex<()>,
}

impl PositionStateMachine {
    pub fn new(context: PositionContext) -> Self {
        let mut history = StateHistory::new(HISTORY_CAPACITY);
        history.record("", PositionState::Created.name(), "CREATED", false);
        Self {
            state: AtomicU8::new(PositionState::Created.as_u8()),
            context: Mutex::new(context),
            history: Mutex::new(history),
            transition_lock: Mutex::new(()),
        }
    }

    /// Current state, readable from any task without locks.
    pub fn state(&self) -> PositionState {
        PositionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn position_id(&self) -> String {
        self.context.lock().position_id.clone()
    }

    /// Consistent snapshot of the context.
    pub fn context(&self) -> PositionContext {
        self.context.lock().clone()
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.lock().snapshot()
    }

    /// Pure validity predicate: would `transition` accept this trigger now?
    ///
    /// Distinct from the effecting method; the answer can be stale by the
    /// time a transition is attempted.
    pub fn can_transition(&self, trigger: &PositionTrigger) -> bool {
        !matches!(rule_for(self.state(), trigger), Rule::Reject)
    }

    /// Attempt a guarded transition.
    ///
    /// Exactly one of two racing calls wins; the loser gets
    /// `TransitionError::LostRace` and mutates nothing. Idempotent
    /// re-deliveries (e.g. a second EXIT_CONDITION_MET while EXIT_PENDING)
    /// return `Ok(Ignored)` without a history entry.
    pub fn transition(
        &self,
        trigger: PositionTrigger,
    ) -> Result<TransitionOutcome, TransitionError> {
        let _guard = self.transition_lock.lock();
        let from = self.state();

        let to = match rule_for(from, &trigger) {
            Rule::Move(to) => to,
            Rule::Ignore => return Ok(TransitionOutcome::Ignored),
            Rule::Reject => {
                if from.is_terminal() {
                    return Err(TransitionError::Terminal {
                        state: from.name().to_string(),
                    });
                }
                return Err(TransitionError::NoRule {
                    from: from.name().to_string(),
                    trigger: trigger.name().to_string(),
                });
            }
        };

        // Publish the new state. A concurrent force_state can still move
        // the word underneath us; CAS detects that and the caller loses.
        if self
            .state
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(TransitionError::LostRace {
                from: from.name().to_string(),
            });
        }

        self.apply_action(&trigger, to);
        self.history
            .lock()
            .record(from.name(), to.name(), trigger.name(), false);
        Ok(TransitionOutcome::Changed(to))
    }

    /// Operator escape hatch: set the state unconditionally.
    ///
    /// Bypasses guards but still writes the same state word and appends to
    /// history, so observers see a coherent sequence. Returns the previous
    /// state.
    pub fn force_state(&self, to: PositionState, reason: &str) -> PositionState {
        let _guard = self.transition_lock.lock();
        let from = PositionState::from_u8(self.state.swap(to.as_u8(), Ordering::AcqRel));
        self.history
            .lock()
            .record(from.name(), to.name(), format!("FORCED:{reason}"), true);
        from
    }

    /// Lock-free on the state word; context fields are updated as one
    /// consistent quadruple under the context mutex.
    ///
    /// Invalid prices (≤ 0, NaN, ∞) are rejected silently, as are updates
    /// on a closed position whose final PnL is already frozen.
    pub fn update_price(&self, price: f64) -> bool {
        if !is_valid_price(price) {
            return false;
        }
        if self.state() == PositionState::Closed {
            return false;
        }
        let mut ctx = self.context.lock();
        let (pnl_percent, pnl_usd) = ctx.pnl_at(price);
        ctx.current_price = Some(price);
        ctx.last_price_update = Some(Utc::now());
        ctx.pnl_percent = Some(pnl_percent);
        ctx.pnl_usd = Some(pnl_usd);
        true
    }

    fn apply_action(&self, trigger: &PositionTrigger, to: PositionState) {
        let mut ctx = self.context.lock();
        match trigger {
            PositionTrigger::ExitConditionMet { reason } => {
                ctx.exit_reason = Some(reason.clone());
            }
            PositionTrigger::ManualExitRequested => {
                if ctx.exit_reason.is_none() {
                    ctx.exit_reason = Some("manual exit".to_string());
                }
            }
            PositionTrigger::ExitCompleted => {
                debug_assert_eq!(to, PositionState::Closed);
                if ctx.exit_reason.is_none() {
                    // Force-close out of ERROR without a recorded reason.
                    ctx.exit_reason = Some("forced close".to_string());
                }
                ctx.exit_timestamp = Some(Utc::now());
                if let Some(price) = ctx.current_price {
                    let (pnl_percent, pnl_usd) = ctx.pnl_at(price);
                    ctx.pnl_percent = Some(pnl_percent);
                    ctx.pnl_usd = Some(pnl_usd);
                }
            }
            PositionTrigger::ExitFailed { reason } => {
                ctx.error = Some(reason.clone());
            }
            PositionTrigger::ErrorOccurred { error } => {
                ctx.error = Some(error.clone());
            }
            PositionTrigger::RecoveryCompleted => {
                ctx.error = None;
            }
            PositionTrigger::ExitRejected => {
                ctx.exit_reason = None;
            }
            _ => {}
        }
    }
}
