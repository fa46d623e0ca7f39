use crate::domain::ports::PositionRepository;
use crate::domain::position::Position;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory repository used by tests and dry-run wiring. The embedded
/// database lives behind the same trait in production.
pub struct InMemoryPositionRepository {
    positions: RwLock<HashMap<String, Position>>,
    events: RwLock<Vec<DateTime<Utc>>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    /// Test hook: record an event timestamp for prune accounting.
    pub fn record_event(&self, timestamp: DateTime<Utc>) {
        self.events.write().push(timestamp);
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }
}

impl Default for InMemoryPositionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn add_position(&self, position: Position) -> Result<()> {
        self.positions
            .write()
            .insert(position.id.clone(), position);
        Ok(())
    }

    async fn get_position(&self, id: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().get(id).cloned())
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .read()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    async fn close_position(
        &self,
        id: &str,
        exit_trade_id: &str,
        exit_timestamp: DateTime<Utc>,
        pnl_usd: f64,
        pnl_percent: f64,
    ) -> Result<()> {
        let mut positions = self.positions.write();
        let position = positions
            .get_mut(id)
            .ok_or_else(|| anyhow!("position not found: {id}"))?;
        if !position.is_open() {
            return Err(anyhow!("position already closed: {id}"));
        }
        position.exit_trade_id = Some(exit_trade_id.to_string());
        position.exit_timestamp = Some(exit_timestamp);
        position.pnl_usd = Some(pnl_usd);
        position.pnl_percent = Some(pnl_percent);
        Ok(())
    }

    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write();
        let initial = events.len();
        events.retain(|ts| *ts >= before);
        Ok((initial - events.len()) as u64)
    }
}
