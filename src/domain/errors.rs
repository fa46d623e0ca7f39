use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Category of a bot error, used to select a recovery plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Config,
    Connection,
    Database,
    TradingExecution,
    StateInvariant,
    Analytics,
    UserInput,
    System,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Config => "CONFIG",
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Database => "DATABASE",
            ErrorKind::TradingExecution => "TRADING_EXECUTION",
            ErrorKind::StateInvariant => "STATE_INVARIANT",
            ErrorKind::Analytics => "ANALYTICS",
            ErrorKind::UserInput => "USER_INPUT",
            ErrorKind::System => "SYSTEM",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Where an error was raised: component + operation + free-form metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Enriched error envelope routed through the error handler and the
/// recovery workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotError {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub severity: Severity,
    pub recoverable: bool,
    pub tags: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    /// Recovery attempts made so far.
    pub attempts: u32,
}

impl BotError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let severity = default_severity(kind);
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            context,
            severity,
            recoverable: default_recoverable(kind),
            tags: Vec::new(),
            first_seen_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Errors that must trigger an orderly shutdown: CRITICAL and
    /// non-recoverable in CONNECTION or SYSTEM.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Critical
            && !self.recoverable
            && matches!(self.kind, ErrorKind::Connection | ErrorKind::System)
    }
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}/{}): {}",
            self.kind, self.id, self.context.component, self.context.operation, self.message
        )
    }
}

impl std::error::Error for BotError {}

fn default_severity(kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::Config | ErrorKind::UserInput => Severity::Low,
        ErrorKind::Analytics => Severity::Medium,
        ErrorKind::Connection | ErrorKind::Database | ErrorKind::TradingExecution => Severity::High,
        ErrorKind::StateInvariant | ErrorKind::System => Severity::Critical,
    }
}

fn default_recoverable(kind: ErrorKind) -> bool {
    !matches!(kind, ErrorKind::Config | ErrorKind::StateInvariant)
}

/// Errors raised by the state machines when a transition is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no rule for trigger {trigger} in state {from}")]
    NoRule { from: String, trigger: String },

    #[error("guard rejected trigger {trigger} in state {from}: {reason}")]
    GuardRejected {
        from: String,
        trigger: String,
        reason: String,
    },

    #[error("lost transition race from state {from}")]
    LostRace { from: String },

    #[error("machine is terminal in state {state}")]
    Terminal { state: String },
}
