//! Pool-discovery → evaluation → trade pipeline.
//!
//! One `TradingStateMachine` per candidate pool, keyed `pool_<signature>`.
//! The coordinator task is the serial lane for every workflow it owns;
//! other subsystems only talk to it through the event bus.

use crate::application::error_handler::ErrorHandler;
use crate::application::market_monitor::MarketMonitor;
use crate::application::risk_manager::RiskManager;
use crate::application::slippage::{SlippageMode, SlippageProtection};
use crate::domain::errors::{BotError, ErrorContext, ErrorKind};
use crate::domain::events::{BotEvent, EventListener};
use crate::domain::ports::{StrategyEngine, TradeExecutor};
use crate::domain::state::trading::{TradingState, TradingStateMachine, TradingTrigger};
use crate::domain::types::{NewPoolEvent, TradeDecision, TradeResult};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const DRY_RUN_SIGNATURE: &str = "DRY_RUN_SIGNATURE";
pub const DRY_RUN_TRADE: &str = "DRY_RUN_TRADE";
pub const DRY_RUN_POSITION: &str = "DRY_RUN_POSITION";

/// Assumed depth for a pool too new to have a liquidity window yet.
const FRESH_POOL_LIQUIDITY_USD: f64 = 10_000.0;

/// Bus listener that forwards trading-relevant events into the
/// coordinator's channel.
struct TradingEventForwarder {
    tx: mpsc::UnboundedSender<BotEvent>,
}

impl EventListener for TradingEventForwarder {
    fn on_event(&self, event: &BotEvent) {
        if matches!(
            event,
            BotEvent::NewPool(_) | BotEvent::TradeDecision(_) | BotEvent::TradeResult(_)
        ) {
            let _ = self.tx.send(event.clone());
        }
    }
}

pub struct TradingCoordinatorConfig {
    pub dry_run: bool,
    pub confirmation_timeout: Duration,
}

impl Default for TradingCoordinatorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            confirmation_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TradingCoordinator {
    config: TradingCoordinatorConfig,
    bus: EventBus,
    strategy: Arc<dyn StrategyEngine>,
    executor: Arc<dyn TradeExecutor>,
    risk_manager: Arc<RiskManager>,
    slippage: Arc<SlippageProtection>,
    market_monitor: Arc<MarketMonitor>,
    breakers: Arc<CircuitBreakerRegistry>,
    error_handler: Arc<ErrorHandler>,
    workflows: HashMap<String, TradingStateMachine>,
    /// tokenAddress → workflowId. Kept in lockstep with `workflows` so
    /// decision routing actually filters by token.
    token_index: HashMap<String, String>,
    /// Signatures already turned into a workflow; duplicates coalesce.
    seen_signatures: HashSet<String>,
    rx: mpsc::UnboundedReceiver<BotEvent>,
}

impl TradingCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TradingCoordinatorConfig,
        bus: EventBus,
        strategy: Arc<dyn StrategyEngine>,
        executor: Arc<dyn TradeExecutor>,
        risk_manager: Arc<RiskManager>,
        slippage: Arc<SlippageProtection>,
        market_monitor: Arc<MarketMonitor>,
        breakers: Arc<CircuitBreakerRegistry>,
        error_handler: Arc<ErrorHandler>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(Arc::new(TradingEventForwarder { tx }));
        Self {
            config,
            bus,
            strategy,
            executor,
            risk_manager,
            slippage,
            market_monitor,
            breakers,
            error_handler,
            workflows: HashMap::new(),
            token_index: HashMap::new(),
            seen_signatures: HashSet::new(),
            rx,
        }
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.len()
    }

    pub fn find_workflow_by_token(&self, token_address: &str) -> Option<&str> {
        self.token_index.get(token_address).map(String::as_str)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("TradingCoordinator: started (dry_run={})", self.config.dry_run);
        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("TradingCoordinator: event stream ended");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("TradingCoordinator: stopped");
                        return;
                    }
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::NewPool(pool) => self.handle_new_pool(pool).await,
            BotEvent::TradeDecision(decision) => self.handle_trade_decision(decision).await,
            BotEvent::TradeResult(result) => self.handle_trade_result(result),
            _ => {}
        }
    }

    async fn handle_new_pool(&mut self, pool: NewPoolEvent) {
        if !self.seen_signatures.insert(pool.signature.clone()) {
            debug!(
                "TradingCoordinator: duplicate pool event {} ignored",
                pool.signature
            );
            return;
        }

        let workflow_id = format!("pool_{}", pool.signature);
        info!(
            "TradingCoordinator [{}]: new {} pool {}",
            workflow_id, pool.dex, pool.pool_address
        );

        let mut machine = TradingStateMachine::new();
        machine.context_mut().pool_address = Some(pool.pool_address.clone());
        if let Err(e) = machine.transition(TradingTrigger::PoolDetected) {
            error!("TradingCoordinator [{workflow_id}]: {e}");
            return;
        }

        let decision = match self.strategy.evaluate_pool(&pool).await {
            Ok(decision) => decision,
            Err(e) => {
                self.fail_machine(&workflow_id, machine, &format!("evaluation failed: {e}"));
                return;
            }
        };

        let Some(decision) = decision.filter(|d| d.should_trade) else {
            // Guard routes the machine back to IDLE; the workflow deletes
            // itself within the same scheduling step.
            let _ = machine.transition(TradingTrigger::EvaluationCompleted);
            debug!("TradingCoordinator [{workflow_id}]: no trade, workflow dropped");
            return;
        };

        machine.context_mut().token_address = Some(decision.target_token.clone());
        machine.context_mut().trade_amount = Some(decision.trade_amount_usd);
        if let Err(e) = machine.transition(TradingTrigger::EvaluationCompleted) {
            error!("TradingCoordinator [{workflow_id}]: {e}");
            return;
        }

        let gate = self.risk_manager.assess_trade_risk(&decision);
        if !gate.approved {
            warn!(
                "TradingCoordinator [{workflow_id}]: risk gate refused: {}",
                gate.reason.as_deref().unwrap_or("unspecified")
            );
            let _ = machine.transition(TradingTrigger::PreparationFailed {
                reason: gate.reason.unwrap_or_else(|| "risk gate refused".into()),
            });
            return;
        }

        // Slippage admission: a market in emergency mode (tripped breaker,
        // extreme volatility, drained liquidity) is no place to buy in.
        let liquidity = self
            .market_monitor
            .pool_liquidity(&decision.pool_address)
            .unwrap_or(FRESH_POOL_LIQUIDITY_USD);
        let recommendation = self.slippage.adaptive_limit(
            decision.trade_amount_usd,
            liquidity,
            self.market_monitor.overall_volatility(),
            !self.breakers.all_healthy(),
        );
        if recommendation.mode == SlippageMode::Emergency {
            warn!(
                "TradingCoordinator [{workflow_id}]: emergency slippage mode, trade refused"
            );
            let _ = machine.transition(TradingTrigger::PreparationFailed {
                reason: "emergency slippage mode".into(),
            });
            return;
        }
        debug!(
            "TradingCoordinator [{workflow_id}]: slippage {:.2}% (impact {:.2}%)",
            recommendation.percent, recommendation.estimated_impact_percent
        );

        let mut decision = decision;
        decision.risk_score = gate.risk_score;

        self.token_index
            .insert(decision.target_token.clone(), workflow_id.clone());
        self.workflows.insert(workflow_id, machine);
        self.bus.publish(BotEvent::TradeDecision(decision));
    }

    async fn handle_trade_decision(&mut self, decision: TradeDecision) {
        let Some(workflow_id) = self
            .token_index
            .get(&decision.target_token)
            .cloned()
        else {
            warn!(
                "TradingCoordinator: decision for unknown token {} dropped",
                decision.target_token
            );
            return;
        };
        let Some(machine) = self.workflows.get_mut(&workflow_id) else {
            return;
        };

        if let Err(e) = machine.transition(TradingTrigger::TradePrepared) {
            error!("TradingCoordinator [{workflow_id}]: {e}");
            return;
        }

        let result = if self.config.dry_run {
            machine
                .transition(TradingTrigger::TradeSubmitted)
                .and_then(|_| machine.transition(TradingTrigger::TradeConfirmed))
                .ok();
            info!("TradingCoordinator [{workflow_id}]: dry-run fill synthesized");
            TradeResult {
                success: true,
                signature: Some(DRY_RUN_SIGNATURE.to_string()),
                trade_id: Some(DRY_RUN_TRADE.to_string()),
                position_id: Some(DRY_RUN_POSITION.to_string()),
                error: None,
                timestamp: Utc::now(),
            }
        } else {
            match tokio::time::timeout(
                self.config.confirmation_timeout,
                self.executor.execute_trade(&decision),
            )
            .await
            {
                Ok(Ok(result)) => {
                    let _ = machine.transition(TradingTrigger::TradeSubmitted);
                    if result.success {
                        let _ = machine.transition(TradingTrigger::TradeConfirmed);
                    } else {
                        let _ = machine.transition(TradingTrigger::ConfirmationFailed {
                            reason: result
                                .error
                                .clone()
                                .unwrap_or_else(|| "execution reported failure".into()),
                        });
                    }
                    result
                }
                Ok(Err(e)) => {
                    let _ = machine.transition(TradingTrigger::SubmissionFailed {
                        reason: e.to_string(),
                    });
                    self.publish_error(&workflow_id, &format!("trade submission failed: {e}"));
                    TradeResult::failed(e.to_string())
                }
                Err(_) => {
                    let _ = machine.transition(TradingTrigger::TradeTimeout);
                    self.publish_error(&workflow_id, "trade confirmation timed out");
                    TradeResult::failed("confirmation timeout")
                }
            }
        };

        self.bus.publish(BotEvent::TradeResult(result));
    }

    fn handle_trade_result(&mut self, result: TradeResult) {
        if result.success {
            info!(
                "TradingCoordinator: trade complete (position {})",
                result.position_id.as_deref().unwrap_or("-")
            );
        } else {
            warn!(
                "TradingCoordinator: trade failed: {}",
                result.error.as_deref().unwrap_or("-")
            );
        }
        self.cleanup_terminal_workflows();
    }

    fn cleanup_terminal_workflows(&mut self) {
        let terminal: Vec<String> = self
            .workflows
            .iter()
            .filter(|(_, machine)| machine.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in terminal {
            self.workflows.remove(&id);
            self.token_index.retain(|_, workflow_id| *workflow_id != id);
            debug!("TradingCoordinator [{id}]: workflow cleaned up");
        }
    }

    fn fail_machine(&self, workflow_id: &str, mut machine: TradingStateMachine, reason: &str) {
        let _ = machine.transition(TradingTrigger::ErrorOccurred {
            error: reason.to_string(),
        });
        debug_assert_eq!(machine.state(), TradingState::Error);
        self.publish_error(workflow_id, reason);
        self.bus
            .publish(BotEvent::TradeResult(TradeResult::failed(reason)));
    }

    fn publish_error(&self, workflow_id: &str, reason: &str) {
        self.error_handler.handle(BotError::new(
            ErrorKind::TradingExecution,
            reason,
            ErrorContext::new("trading-coordinator", "trade").with_meta("workflow", workflow_id),
        ));
    }
}
