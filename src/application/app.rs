//! Application assembly and lifecycle.
//!
//! Wires adapters, analytics and coordinators onto one event bus, drives
//! the system state machine through startup, and owns the shutdown
//! signal every loop cooperates with.

use crate::application::data_management::{DataManagementConfig, DataManagementWorkflow};
use crate::application::error_handler::ErrorHandler;
use crate::application::market_monitor::MarketMonitor;
use crate::application::position_coordinator::PositionCoordinator;
use crate::application::recovery::RecoveryWorkflow;
use crate::application::risk_manager::RiskManager;
use crate::application::slippage::SlippageProtection;
use crate::application::trading_coordinator::TradingCoordinator;
use crate::config::Config;
use crate::domain::events::{BotEvent, SystemStatusEvent};
use crate::domain::ports::{
    BlockchainAdapter, PositionRepository, PriceFeedService, StrategyEngine, TradeExecutor,
};
use crate::domain::state::system::{
    ComponentStatus, SystemStateMachine, SystemTrigger,
};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::event_bus::EventBus;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// External collaborators injected at build time.
pub struct Adapters {
    pub blockchain: Arc<dyn BlockchainAdapter>,
    pub strategy: Arc<dyn StrategyEngine>,
    pub executor: Arc<dyn TradeExecutor>,
    pub price_feed: Arc<dyn PriceFeedService>,
    pub repository: Arc<dyn PositionRepository>,
}

pub struct Application {
    config: Config,
    adapters: Adapters,
    bus: EventBus,
    breakers: Arc<CircuitBreakerRegistry>,
    risk_manager: Arc<RiskManager>,
    market_monitor: Arc<MarketMonitor>,
    error_handler: Arc<ErrorHandler>,
    slippage: Arc<SlippageProtection>,
    system: Arc<Mutex<SystemStateMachine>>,
}

/// Handle returned by `start`; dropping it does not stop the bot.
pub struct SystemHandle {
    pub bus: EventBus,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub risk_manager: Arc<RiskManager>,
    pub slippage: Arc<SlippageProtection>,
    pub error_handler: Arc<ErrorHandler>,
    system: Arc<Mutex<SystemStateMachine>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SystemHandle {
    /// Orderly stop: SHUTTING_DOWN on the system machine, then the
    /// cooperative signal every loop selects on.
    pub fn shutdown(&self) {
        let mut system = self.system.lock();
        if system.transition(SystemTrigger::ShutdownRequested).is_ok() {
            info!("System: shutdown requested");
        }
        let _ = self.shutdown_tx.send(true);
        let _ = system.transition(SystemTrigger::ShutdownCompleted);
    }

    pub fn system_state(&self) -> crate::domain::state::system::SystemState {
        self.system.lock().state()
    }
}

impl Application {
    pub fn build(config: Config, adapters: Adapters) -> Result<Self> {
        config.validate().context("configuration invalid")?;
        info!("Application: building (dry_run={})", config.dry_run);

        let bus = EventBus::new();
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));
        let risk_manager = Arc::new(RiskManager::new(config.risk_config(), bus.clone()));
        let market_monitor = Arc::new(MarketMonitor::new(
            config.monitor_config(),
            Arc::clone(&adapters.blockchain),
            Arc::clone(&breakers),
            bus.clone(),
        ));
        let error_handler = Arc::new(ErrorHandler::new(bus.clone()));
        let slippage = Arc::new(SlippageProtection::new(config.slippage_config()));
        let system = Arc::new(Mutex::new(SystemStateMachine::new()));

        Ok(Self {
            config,
            adapters,
            bus,
            breakers,
            risk_manager,
            market_monitor,
            error_handler,
            slippage,
            system,
        })
    }

    pub async fn start(self) -> Result<SystemHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Bring up the hard dependencies before READY.
        self.adapters
            .blockchain
            .initialize()
            .await
            .context("blockchain adapter failed to initialize")?;
        {
            let mut system = self.system.lock();
            system.set_component(|c| {
                c.database = ComponentStatus::Connected;
                c.rpc = ComponentStatus::Connected;
                c.blockchain = ComponentStatus::Connected;
            });
            system
                .transition(SystemTrigger::InitializationCompleted)
                .context("system initialization guard failed")?;
            system
                .transition(SystemTrigger::Start)
                .context("system start failed")?;
        }
        self.publish_system_status();

        // Pool discovery pump: adapter stream → bus.
        let mut pool_rx = self
            .adapters
            .blockchain
            .subscribe_new_pools()
            .await
            .context("pool subscription failed")?;
        let pump_bus = self.bus.clone();
        let mut pump_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_pool = pool_rx.recv() => {
                        match maybe_pool {
                            Some(pool) => pump_bus.publish(BotEvent::NewPool(pool)),
                            None => {
                                warn!("Application: pool stream ended");
                                return;
                            }
                        }
                    }
                    _ = pump_shutdown.changed() => {
                        if *pump_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        let trading = TradingCoordinator::new(
            self.config.trading_coordinator_config(),
            self.bus.clone(),
            Arc::clone(&self.adapters.strategy),
            Arc::clone(&self.adapters.executor),
            Arc::clone(&self.risk_manager),
            Arc::clone(&self.slippage),
            Arc::clone(&self.market_monitor),
            Arc::clone(&self.breakers),
            Arc::clone(&self.error_handler),
        );
        tokio::spawn(trading.run(shutdown_rx.clone()));

        let positions = PositionCoordinator::new(
            self.config.position_coordinator_config(),
            self.bus.clone(),
            Arc::clone(&self.adapters.price_feed),
            Arc::clone(&self.adapters.repository),
            Arc::clone(&self.adapters.executor),
            Arc::clone(&self.breakers),
            Arc::clone(&self.risk_manager),
            Arc::clone(&self.market_monitor),
            Arc::clone(&self.error_handler),
            self.config.enabled_exit_strategies(),
        );
        tokio::spawn(positions.run(shutdown_rx.clone()));

        let risk = Arc::clone(&self.risk_manager);
        let risk_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { risk.run(risk_shutdown).await });

        let monitor = Arc::clone(&self.market_monitor);
        let monitor_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        let recovery = RecoveryWorkflow::new(self.bus.clone(), Arc::clone(&self.adapters.blockchain));
        tokio::spawn(recovery.run(shutdown_rx.clone()));

        let data_management = DataManagementWorkflow::new(
            DataManagementConfig::default(),
            Arc::clone(&self.adapters.repository),
            self.bus.clone(),
        );
        tokio::spawn(data_management.run(shutdown_rx.clone()));

        // Emergency shutdowns arrive over the bus from any subsystem.
        let emergency_system = Arc::clone(&self.system);
        let emergency_tx = shutdown_tx.clone();
        struct EmergencyListener {
            system: Arc<Mutex<SystemStateMachine>>,
            shutdown_tx: watch::Sender<bool>,
        }
        impl crate::domain::events::EventListener for EmergencyListener {
            fn on_event(&self, event: &BotEvent) {
                if let BotEvent::EmergencyShutdown { reason } = event {
                    error!("System: emergency shutdown: {reason}");
                    let mut system = self.system.lock();
                    let _ = system.transition(SystemTrigger::ShutdownRequested);
                    let _ = self.shutdown_tx.send(true);
                    let _ = system.transition(SystemTrigger::ShutdownCompleted);
                }
            }
        }
        self.bus.subscribe(Arc::new(EmergencyListener {
            system: emergency_system,
            shutdown_tx: emergency_tx,
        }));

        info!("Application: all coordinators running");
        Ok(SystemHandle {
            bus: self.bus,
            breakers: self.breakers,
            risk_manager: self.risk_manager,
            slippage: self.slippage,
            error_handler: self.error_handler,
            system: self.system,
            shutdown_tx,
        })
    }

    fn publish_system_status(&self) {
        let system = self.system.lock();
        let context = system.context();
        self.bus.publish(BotEvent::SystemStatus(SystemStatusEvent {
            state: system.state().name().to_string(),
            uptime_secs: context.metrics.uptime_secs,
            open_positions: context.metrics.open_positions,
            total_trades: context.metrics.total_trades,
            timestamp: Utc::now(),
        }));
    }
}
