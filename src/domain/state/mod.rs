//! Lifecycle state machines.
//!
//! Three machines share the same shape: a state enum, a trigger enum, a
//! rule table with guards, and a bounded history ring. The position
//! machine additionally exposes a lock-free state word because price ticks
//! and exit evaluations race against transitions.

pub mod position;
pub mod system;
pub mod trading;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One observed transition, kept for diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the transition bypassed guards (operator intervention).
    pub forced: bool,
}

/// Append-only ring of transition records. Never load-bearing.
#[derive(Debug, Clone)]
pub struct StateHistory {
    records: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl StateHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        trigger: impl Into<String>,
        forced: bool,
    ) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(TransitionRecord {
            from: from.into(),
            to: to.into(),
            trigger: trigger.into(),
            timestamp: Utc::now(),
            forced,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> Vec<TransitionRecord> {
        self.records.iter().cloned().collect()
    }
}
