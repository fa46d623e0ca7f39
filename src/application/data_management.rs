//! Periodic housekeeping: event pruning and backup markers.

use crate::domain::events::{BotEvent, Notification};
use crate::domain::ports::PositionRepository;
use crate::infrastructure::event_bus::EventBus;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct DataManagementConfig {
    pub interval: Duration,
    /// Events older than this are pruned each tick.
    pub retention_hours: i64,
}

impl Default for DataManagementConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention_hours: 24,
        }
    }
}

pub struct DataManagementWorkflow {
    config: DataManagementConfig,
    repository: Arc<dyn PositionRepository>,
    bus: EventBus,
}

impl DataManagementWorkflow {
    pub fn new(
        config: DataManagementConfig,
        repository: Arc<dyn PositionRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            repository,
            bus,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "DataManagement: started (every {:?}, retention {}h)",
            self.config.interval, self.config.retention_hours
        );
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("DataManagement: stopped");
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) {
        let started = std::time::Instant::now();
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.retention_hours);
        match self.repository.cleanup_old_events(cutoff).await {
            Ok(pruned) => {
                if pruned > 0 {
                    info!("DataManagement: pruned {pruned} events older than {cutoff}");
                }
                self.bus.publish(BotEvent::Notification(Notification {
                    title: "backup checkpoint".to_string(),
                    body: format!("pruned {pruned} events"),
                    timestamp: Utc::now(),
                }));
            }
            Err(e) => {
                warn!("DataManagement: prune failed: {e}");
            }
        }
        self.bus.publish(BotEvent::CycleComplete {
            component: "data-management".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}
