//! Process-wide lifecycle machine.
//!
//! Publishes a `systemStatus` event on every accepted transition (the
//! caller forwards it to the bus). Guards on the component record keep the
//! bot from entering READY/RUNNING without its required dependencies.

use crate::domain::errors::TransitionError;
use crate::domain::state::{StateHistory, TransitionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemState {
    Initializing,
    Ready,
    Running,
    Paused,
    Maintenance,
    Error,
    ShuttingDown,
    Stopped,
}

impl SystemState {
    pub fn name(self) -> &'static str {
        match self {
            SystemState::Initializing => "INITIALIZING",
            SystemState::Ready => "READY",
            SystemState::Running => "RUNNING",
            SystemState::Paused => "PAUSED",
            SystemState::Maintenance => "MAINTENANCE",
            SystemState::Error => "ERROR",
            SystemState::ShuttingDown => "SHUTTING_DOWN",
            SystemState::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl Default for ComponentStatus {
    fn default() -> Self {
        ComponentStatus::Disconnected
    }
}

/// Connection status of each dependency the system tracks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub database: ComponentStatus,
    pub rpc: ComponentStatus,
    pub blockchain: ComponentStatus,
    pub trading: ComponentStatus,
    pub tui: ComponentStatus,
}

impl ComponentRecord {
    /// READY and post-recovery states require both hard dependencies.
    pub fn required_connected(&self) -> bool {
        self.database == ComponentStatus::Connected && self.rpc == ComponentStatus::Connected
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_trades: u64,
    pub open_positions: usize,
    pub uptime_secs: u64,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStateContext {
    pub start_time: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub components: ComponentRecord,
    pub metrics: SystemMetrics,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemTrigger {
    InitializationCompleted,
    Start,
    Pause,
    Resume,
    EnterMaintenance,
    ExitMaintenance,
    ErrorOccurred { error: String },
    RecoveryCompleted,
    ShutdownRequested,
    ShutdownCompleted,
    ForceStop,
}

impl SystemTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            SystemTrigger::InitializationCompleted => "INITIALIZATION_COMPLETED",
            SystemTrigger::Start => "START",
            SystemTrigger::Pause => "PAUSE",
            SystemTrigger::Resume => "RESUME",
            SystemTrigger::EnterMaintenance => "ENTER_MAINTENANCE",
            SystemTrigger::ExitMaintenance => "EXIT_MAINTENANCE",
            SystemTrigger::ErrorOccurred { .. } => "ERROR_OCCURRED",
            SystemTrigger::RecoveryCompleted => "RECOVERY_COMPLETED",
            SystemTrigger::ShutdownRequested => "SHUTDOWN_REQUESTED",
            SystemTrigger::ShutdownCompleted => "SHUTDOWN_COMPLETED",
            SystemTrigger::ForceStop => "FORCE_STOP",
        }
    }
}

pub struct SystemStateMachine {
    state: SystemState,
    context: SystemStateContext,
    history: StateHistory,
}

impl SystemStateMachine {
    pub fn new() -> Self {
        let mut history = StateHistory::new(HISTORY_CAPACITY);
        history.record("", SystemState::Initializing.name(), "CREATED", false);
        Self {
            state: SystemState::Initializing,
            context: SystemStateContext {
                start_time: Some(Utc::now()),
                ..Default::default()
            },
            history,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn context(&self) -> &SystemStateContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SystemStateContext {
        &mut self.context
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.snapshot()
    }

    pub fn set_component(&mut self, apply: impl FnOnce(&mut ComponentRecord)) {
        apply(&mut self.context.components);
    }

    fn target_for(&self, trigger: &SystemTrigger) -> Result<SystemState, TransitionError> {
        use SystemState as S;
        use SystemTrigger as T;

        let no_rule = || {
            Err(TransitionError::NoRule {
                from: self.state.name().to_string(),
                trigger: trigger.name().to_string(),
            })
        };
        let guard = |reason: &str| {
            Err(TransitionError::GuardRejected {
                from: self.state.name().to_string(),
                trigger: trigger.name().to_string(),
                reason: reason.to_string(),
            })
        };

        match trigger {
            T::ForceStop => return Ok(S::Stopped),
            T::ShutdownRequested => {
                return if self.state == S::Stopped {
                    no_rule()
                } else {
                    Ok(S::ShuttingDown)
                };
            }
            T::ErrorOccurred { .. } => {
                return if self.state == S::Stopped {
                    no_rule()
                } else {
                    Ok(S::Error)
                };
            }
            _ => {}
        }

        match (self.state, trigger) {
            (S::Initializing, T::InitializationCompleted) => {
                if self.context.components.required_connected() {
                    Ok(S::Ready)
                } else {
                    guard("database and rpc must be connected")
                }
            }
            (S::Ready, T::Start) => Ok(S::Running),
            (S::Running, T::Pause) => Ok(S::Paused),
            (S::Paused, T::Resume) => Ok(S::Running),
            (S::Ready | S::Running | S::Paused, T::EnterMaintenance) => Ok(S::Maintenance),
            (S::Maintenance, T::ExitMaintenance) => Ok(S::Running),
            (S::Error, T::RecoveryCompleted) => {
                if self.context.components.required_connected() {
                    Ok(S::Ready)
                } else {
                    guard("database and rpc must be connected")
                }
            }
            (S::ShuttingDown, T::ShutdownCompleted) => Ok(S::Stopped),
            _ => no_rule(),
        }
    }

    pub fn can_transition(&self, trigger: &SystemTrigger) -> bool {
        self.target_for(trigger).is_ok()
    }

    pub fn transition(&mut self, trigger: SystemTrigger) -> Result<SystemState, TransitionError> {
        let from = self.state;
        let to = self.target_for(&trigger)?;

        if let SystemTrigger::ErrorOccurred { error } = &trigger {
            self.context.error_count += 1;
            self.context.last_error = Some(error.clone());
        }

        self.state = to;
        if let Some(start) = self.context.start_time {
            self.context.metrics.uptime_secs = (Utc::now() - start).num_seconds().max(0) as u64;
        }
        self.history
            .record(from.name(), to.name(), trigger.name(), false);
        Ok(to)
    }

    pub fn force_state(&mut self, to: SystemState, reason: &str) -> SystemState {
        let from = self.state;
        self.state = to;
        self.history
            .record(from.name(), to.name(), format!("FORCED:{reason}"), true);
        from
    }
}

impl Default for SystemStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
