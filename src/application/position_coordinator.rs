//! Position monitoring and exit processing.
//!
//! Owns the positionId → machine map and drives the periodic cycle: fetch
//! price, feed the atomic core, evaluate exit strategies, process exits.
//! The coordinator task is the serial lane for every position it owns;
//! the atomic core keeps cross-lane readers safe.

use crate::application::error_handler::ErrorHandler;
use crate::application::exit_strategies::{ExitEvaluation, ExitStrategy, evaluate_all};
use crate::application::market_monitor::MarketMonitor;
use crate::application::risk_manager::RiskManager;
use crate::domain::errors::{BotError, ErrorContext, ErrorKind};
use crate::domain::events::{BotEvent, EventListener, ExitRequest, PositionUpdate};
use crate::domain::ports::{PositionRepository, PriceFeedService, TradeExecutor};
use crate::domain::position::Position;
use crate::domain::state::position::{
    PositionState, PositionStateMachine, PositionTrigger, TransitionOutcome,
};
use crate::domain::types::{ExitUrgency, TradeResult};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const PRICE_FEED_BREAKER: &str = "price-feed";

struct PositionEventForwarder {
    tx: mpsc::UnboundedSender<BotEvent>,
}

impl EventListener for PositionEventForwarder {
    fn on_event(&self, event: &BotEvent) {
        if matches!(event, BotEvent::TradeResult(_) | BotEvent::ExitRequest(_)) {
            let _ = self.tx.send(event.clone());
        }
    }
}

pub struct PositionCoordinatorConfig {
    pub polling_interval: Duration,
    /// When set, exits park in EXIT_PENDING until an operator exit
    /// request arrives; otherwise exits are approved immediately.
    pub confirmation_required: bool,
}

impl Default for PositionCoordinatorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(1),
            confirmation_required: false,
        }
    }
}

struct MonitorEntry {
    machine: Arc<PositionStateMachine>,
    position: Position,
    /// Highest valid price seen since entry; feeds trailing stops.
    peak_price: Option<f64>,
    initial_liquidity_usd: Option<f64>,
    developer_sold: bool,
}

pub struct PositionCoordinator {
    config: PositionCoordinatorConfig,
    bus: EventBus,
    price_feed: Arc<dyn PriceFeedService>,
    repository: Arc<dyn PositionRepository>,
    executor: Arc<dyn TradeExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    risk_manager: Arc<RiskManager>,
    market_monitor: Arc<MarketMonitor>,
    error_handler: Arc<ErrorHandler>,
    strategies: Vec<ExitStrategy>,
    entries: HashMap<String, MonitorEntry>,
    rx: mpsc::UnboundedReceiver<BotEvent>,
}

impl PositionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PositionCoordinatorConfig,
        bus: EventBus,
        price_feed: Arc<dyn PriceFeedService>,
        repository: Arc<dyn PositionRepository>,
        executor: Arc<dyn TradeExecutor>,
        breakers: Arc<CircuitBreakerRegistry>,
        risk_manager: Arc<RiskManager>,
        market_monitor: Arc<MarketMonitor>,
        error_handler: Arc<ErrorHandler>,
        strategies: Vec<ExitStrategy>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(Arc::new(PositionEventForwarder { tx }));
        Self {
            config,
            bus,
            price_feed,
            repository,
            executor,
            breakers,
            risk_manager,
            market_monitor,
            error_handler,
            strategies,
            entries: HashMap::new(),
            rx,
        }
    }

    pub fn position_count(&self) -> usize {
        self.entries.len()
    }

    pub fn machine(&self, position_id: &str) -> Option<Arc<PositionStateMachine>> {
        self.entries
            .get(position_id)
            .map(|entry| Arc::clone(&entry.machine))
    }

    /// External signal hook: the token deployer moved funds.
    pub fn flag_developer_activity(&mut self, position_id: &str) {
        if let Some(entry) = self.entries.get_mut(position_id) {
            entry.developer_sold = true;
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "PositionCoordinator: started (interval {:?})",
            self.config.polling_interval
        );
        let mut interval = tokio::time::interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.monitoring_cycle().await;
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(BotEvent::TradeResult(result)) => {
                            self.handle_trade_result(result).await;
                        }
                        Some(BotEvent::ExitRequest(request)) => {
                            self.handle_exit_request(request).await;
                        }
                        Some(_) => {}
                        None => {
                            warn!("PositionCoordinator: event stream ended");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("PositionCoordinator: stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Trade completions turn into monitored positions; the executor has
    /// already persisted the row.
    pub async fn handle_trade_result(&mut self, result: TradeResult) {
        if !result.success {
            return;
        }
        let Some(position_id) = result.position_id else {
            return;
        };
        if self.entries.contains_key(&position_id) {
            return;
        }
        match self.repository.get_position(&position_id).await {
            Ok(Some(position)) => self.open_position(position).await,
            Ok(None) => {
                debug!("PositionCoordinator [{position_id}]: no persisted row, skipping");
            }
            Err(e) => {
                self.publish_error(
                    ErrorKind::Database,
                    &position_id,
                    &format!("position load failed: {e}"),
                );
            }
        }
    }

    pub async fn open_position(&mut self, position: Position) {
        let position_id = position.id.clone();
        let context = crate::domain::position::PositionContext::new(
            position_id.clone(),
            position.token_address.clone(),
            position.entry_price,
            position.amount,
        );
        let machine = Arc::new(PositionStateMachine::new(context));
        if let Err(e) = machine.transition(PositionTrigger::PositionOpened) {
            error!("PositionCoordinator [{position_id}]: {e}");
            return;
        }

        self.risk_manager
            .set_exposure(&position.token_address, position.entry_value_usd());

        let breaker = self.breakers.get_or_create(PRICE_FEED_BREAKER);
        let initial_liquidity_usd = breaker
            .call(self.price_feed.get_pool_liquidity(&position.pool_address))
            .await
            .ok()
            .flatten()
            .map(|data| data.liquidity_usd);

        info!(
            "PositionCoordinator [{position_id}]: monitoring {} (entry {:.6}, liquidity {:?})",
            position.token_address, position.entry_price, initial_liquidity_usd
        );
        self.entries.insert(
            position_id,
            MonitorEntry {
                machine,
                position,
                peak_price: None,
                initial_liquidity_usd,
                developer_sold: false,
            },
        );
    }

    /// One pass over every actively monitored position.
    pub async fn monitoring_cycle(&mut self) {
        let started = std::time::Instant::now();
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for position_id in ids {
            self.monitor_one(&position_id).await;
        }
        self.reap_closed();
        self.bus.publish(BotEvent::CycleComplete {
            component: "position-coordinator".to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    async fn monitor_one(&mut self, position_id: &str) {
        let Some(entry) = self.entries.get(position_id) else {
            return;
        };
        if entry.machine.state() != PositionState::Monitoring {
            return;
        }
        let token = entry.position.token_address.clone();
        let pool = entry.position.pool_address.clone();
        let machine = Arc::clone(&entry.machine);

        let breaker = self.breakers.get_or_create(PRICE_FEED_BREAKER);
        let price = match breaker.call(self.price_feed.get_token_price(&token)).await {
            Ok(Some(data)) => data.price_usd,
            Ok(None) => {
                debug!("PositionCoordinator [{position_id}]: no price for {token}");
                return;
            }
            Err(e) => {
                debug!("PositionCoordinator [{position_id}]: price fetch failed: {e}");
                return;
            }
        };

        if machine.update_price(price) {
            self.risk_manager.record_price(&token, price);
            self.market_monitor.record_price(&token, price);
        }

        let current_liquidity_usd = breaker
            .call(self.price_feed.get_pool_liquidity(&pool))
            .await
            .ok()
            .flatten()
            .map(|data| data.liquidity_usd);
        if let Some(liquidity) = current_liquidity_usd {
            self.market_monitor.record_liquidity(&pool, liquidity);
        }
        if let Some(min) = self.market_monitor.min_pool_liquidity() {
            self.risk_manager.set_min_pool_liquidity(min);
        }

        // Refresh the peak before evaluating trailing stops.
        let Some(entry) = self.entries.get_mut(position_id) else {
            return;
        };
        if entry.peak_price.is_none_or(|peak| price > peak) {
            entry.peak_price = Some(price);
        }

        let context = machine.context();
        let evaluation = ExitEvaluation {
            position: &context,
            now: Utc::now(),
            peak_price: entry.peak_price,
            initial_liquidity_usd: entry.initial_liquidity_usd,
            current_liquidity_usd,
            developer_sold: entry.developer_sold,
        };
        let signal = evaluate_all(&self.strategies, &evaluation);

        self.publish_position_update(position_id, &machine);

        let Some(signal) = signal else {
            return;
        };
        info!(
            "PositionCoordinator [{position_id}]: exit condition \"{}\" ({:?})",
            signal.reason, signal.urgency
        );
        match machine.transition(PositionTrigger::ExitConditionMet {
            reason: signal.reason.clone(),
        }) {
            Ok(TransitionOutcome::Changed(_)) => {}
            Ok(TransitionOutcome::Ignored) => return,
            Err(e) => {
                debug!("PositionCoordinator [{position_id}]: {e}");
                return;
            }
        }

        if signal.urgency >= ExitUrgency::Immediate {
            // Urgent exits go through the bus so operators and observers
            // see them; processing happens on receipt.
            self.bus.publish(BotEvent::ExitRequest(ExitRequest {
                position_id: position_id.to_string(),
                reason: signal.reason,
                urgency: ExitUrgency::High,
                partial_exit_percentage: signal.partial_exit_percentage,
            }));
        } else if !self.config.confirmation_required {
            self.approve_and_exit(position_id, signal.partial_exit_percentage)
                .await;
        }
    }

    /// Exit request processing; idempotent across EXIT_PENDING/EXITING and
    /// a no-op on CLOSED.
    pub async fn handle_exit_request(&mut self, request: ExitRequest) -> bool {
        let Some(entry) = self.entries.get(&request.position_id) else {
            warn!(
                "PositionCoordinator: exit request for unknown position {}",
                request.position_id
            );
            return false;
        };
        let machine = Arc::clone(&entry.machine);

        match machine.state() {
            PositionState::Closed => {
                debug!(
                    "PositionCoordinator [{}]: exit request on closed position ignored",
                    request.position_id
                );
                return false;
            }
            PositionState::Exiting => return true,
            PositionState::ExitPending => {}
            _ => match machine.transition(PositionTrigger::ManualExitRequested) {
                Ok(_) => {}
                Err(e) => {
                    debug!("PositionCoordinator [{}]: {e}", request.position_id);
                    return false;
                }
            },
        }

        self.approve_and_exit(&request.position_id, request.partial_exit_percentage)
            .await;
        true
    }

    async fn approve_and_exit(&mut self, position_id: &str, partial: Option<f64>) {
        let Some(entry) = self.entries.get(position_id) else {
            return;
        };
        let machine = Arc::clone(&entry.machine);
        let position = entry.position.clone();

        if machine.transition(PositionTrigger::ExitApproved).is_err() {
            return;
        }

        let partial = partial.filter(|pct| *pct > 0.0 && *pct < 100.0);
        match self.executor.execute_exit(&position, partial).await {
            Ok(result) if result.success => {
                if let Some(pct) = partial {
                    self.complete_partial_exit(position_id, pct);
                } else {
                    self.complete_full_exit(position_id, &result).await;
                }
            }
            Ok(result) => {
                let reason = result.error.unwrap_or_else(|| "exit not filled".into());
                let _ = machine.transition(PositionTrigger::ExitFailed {
                    reason: reason.clone(),
                });
                self.publish_error(ErrorKind::TradingExecution, position_id, &reason);
            }
            Err(e) => {
                let _ = machine.transition(PositionTrigger::ExitFailed {
                    reason: e.to_string(),
                });
                self.publish_error(
                    ErrorKind::TradingExecution,
                    position_id,
                    &format!("exit failed: {e}"),
                );
            }
        }
    }

    async fn complete_full_exit(&mut self, position_id: &str, result: &TradeResult) {
        let Some(entry) = self.entries.get(position_id) else {
            return;
        };
        let machine = Arc::clone(&entry.machine);
        let token = entry.position.token_address.clone();

        if machine.transition(PositionTrigger::ExitCompleted).is_err() {
            return;
        }
        let context = machine.context();
        let pnl_usd = context.pnl_usd.unwrap_or(0.0);
        let pnl_percent = context.pnl_percent.unwrap_or(0.0);

        let exit_trade_id = result.trade_id.clone().unwrap_or_else(|| "exit".into());
        if let Err(e) = self
            .repository
            .close_position(
                position_id,
                &exit_trade_id,
                context.exit_timestamp.unwrap_or_else(Utc::now),
                pnl_usd,
                pnl_percent,
            )
            .await
        {
            self.publish_error(
                ErrorKind::Database,
                position_id,
                &format!("close persist failed: {e}"),
            );
        }

        self.risk_manager.remove_exposure(&token);
        self.risk_manager.record_trade_pnl(pnl_usd);
        info!(
            "PositionCoordinator [{position_id}]: closed \"{}\" pnl {:.2}% (${:.2})",
            context.exit_reason.as_deref().unwrap_or("-"),
            pnl_percent,
            pnl_usd
        );
        self.publish_position_update(position_id, &machine);
    }

    /// A partial fill keeps the position open: trim the live amount and
    /// send the pending full exit back to MONITORING.
    fn complete_partial_exit(&mut self, position_id: &str, percentage: f64) {
        let Some(entry) = self.entries.get_mut(position_id) else {
            return;
        };
        let remaining = entry.position.amount * (1.0 - percentage / 100.0);
        entry.position.amount = remaining;

        let machine = Arc::clone(&entry.machine);
        // EXITING has no edge back to MONITORING; route through the error
        // escape used for operator intervention.
        machine.force_state(PositionState::Monitoring, "partial exit");
        info!(
            "PositionCoordinator [{position_id}]: partial exit {percentage:.0}%, {remaining:.2} remaining"
        );
        self.risk_manager.set_exposure(
            &entry.position.token_address,
            entry.position.entry_price * remaining,
        );
        self.publish_position_update(position_id, &machine);
    }

    fn reap_closed(&mut self) {
        let closed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.machine.state() == PositionState::Closed)
            .map(|(id, _)| id.clone())
            .collect();
        for id in closed {
            self.entries.remove(&id);
            debug!("PositionCoordinator [{id}]: machine dropped");
        }
    }

    fn publish_position_update(&self, position_id: &str, machine: &PositionStateMachine) {
        let context = machine.context();
        self.bus.publish(BotEvent::PositionUpdate(PositionUpdate {
            position_id: position_id.to_string(),
            token_address: context.token_address.clone(),
            state: machine.state().name().to_string(),
            current_price: context.current_price,
            pnl_percent: context.pnl_percent,
            pnl_usd: context.pnl_usd,
            timestamp: Utc::now(),
        }));
    }

    fn publish_error(&self, kind: ErrorKind, position_id: &str, message: &str) {
        error!("PositionCoordinator [{position_id}]: {message}");
        self.error_handler.handle(BotError::new(
            kind,
            message,
            ErrorContext::new("position-coordinator", "monitor")
                .with_meta("position", position_id),
        ));
    }
}
