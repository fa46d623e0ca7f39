//! Workflow scenarios: happy-path buy → exit, dry-run, idempotent pool
//! events, and the risk gate refusing oversize trades.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use snipebot::application::error_handler::ErrorHandler;
use snipebot::application::exit_strategies::ExitStrategy;
use snipebot::application::market_monitor::{MarketMonitor, MonitorConfig};
use snipebot::application::position_coordinator::{
    PositionCoordinator, PositionCoordinatorConfig,
};
use snipebot::application::risk_manager::{RiskConfig, RiskManager};
use snipebot::application::slippage::{SlippageConfig, SlippageProtection};
use snipebot::application::trading_coordinator::{
    DRY_RUN_POSITION, DRY_RUN_SIGNATURE, DRY_RUN_TRADE, TradingCoordinator,
    TradingCoordinatorConfig,
};
use snipebot::domain::events::BotEvent;
use snipebot::domain::ports::{PositionRepository, TradeExecutor};
use snipebot::domain::position::Position;
use snipebot::domain::state::position::PositionState;
use snipebot::domain::types::{Dex, NewPoolEvent, TradeDecision, TradeResult};
use snipebot::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use snipebot::infrastructure::event_bus::EventBus;
use snipebot::infrastructure::mock::{MockBlockchainAdapter, MockPriceFeed, MockStrategyEngine};
use snipebot::infrastructure::repository::InMemoryPositionRepository;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Executor that persists the opened position the way the production
/// collaborator does, so the position coordinator can pick it up.
struct RecordingExecutor {
    repo: Arc<InMemoryPositionRepository>,
    calls: AtomicUsize,
}

#[async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute_trade(&self, decision: &TradeDecision) -> Result<TradeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let position = Position {
            id: "p1".to_string(),
            token_address: decision.target_token.clone(),
            pool_address: decision.pool_address.clone(),
            entry_trade_id: "tr1".to_string(),
            entry_price: decision.price,
            amount: decision.expected_amount_out,
            entry_timestamp: Utc::now(),
            exit_trade_id: None,
            exit_timestamp: None,
            pnl_usd: None,
            pnl_percent: None,
        };
        self.repo.add_position(position).await?;
        Ok(TradeResult {
            success: true,
            signature: Some("sigExec".to_string()),
            trade_id: Some("tr1".to_string()),
            position_id: Some("p1".to_string()),
            error: None,
            timestamp: Utc::now(),
        })
    }

    async fn execute_exit(
        &self,
        position: &Position,
        _percentage: Option<f64>,
    ) -> Result<TradeResult> {
        Ok(TradeResult {
            success: true,
            signature: Some("sigExit".to_string()),
            trade_id: Some("tr2".to_string()),
            position_id: Some(position.id.clone()),
            error: None,
            timestamp: Utc::now(),
        })
    }
}

struct Harness {
    bus: EventBus,
    strategy: Arc<MockStrategyEngine>,
    executor: Arc<RecordingExecutor>,
    price_feed: Arc<MockPriceFeed>,
    repo: Arc<InMemoryPositionRepository>,
    trading: TradingCoordinator,
    positions: PositionCoordinator,
}

fn harness(dry_run: bool) -> Harness {
    let bus = EventBus::new();
    let strategy = Arc::new(MockStrategyEngine::new());
    let repo = Arc::new(InMemoryPositionRepository::new());
    let executor = Arc::new(RecordingExecutor {
        repo: Arc::clone(&repo),
        calls: AtomicUsize::new(0),
    });
    let price_feed = Arc::new(MockPriceFeed::new());
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let risk = Arc::new(RiskManager::new(RiskConfig::default(), bus.clone()));
    let monitor = Arc::new(MarketMonitor::new(
        MonitorConfig::default(),
        Arc::new(MockBlockchainAdapter::new()),
        Arc::clone(&breakers),
        bus.clone(),
    ));
    let slippage = Arc::new(SlippageProtection::new(SlippageConfig::default()));
    let error_handler = Arc::new(ErrorHandler::new(bus.clone()));

    let trading = TradingCoordinator::new(
        TradingCoordinatorConfig {
            dry_run,
            confirmation_timeout: Duration::from_secs(5),
        },
        bus.clone(),
        Arc::clone(&strategy) as Arc<dyn snipebot::domain::ports::StrategyEngine>,
        Arc::clone(&executor) as Arc<dyn TradeExecutor>,
        Arc::clone(&risk),
        Arc::clone(&slippage),
        Arc::clone(&monitor),
        Arc::clone(&breakers),
        Arc::clone(&error_handler),
    );
    let positions = PositionCoordinator::new(
        PositionCoordinatorConfig::default(),
        bus.clone(),
        Arc::clone(&price_feed) as Arc<dyn snipebot::domain::ports::PriceFeedService>,
        Arc::clone(&repo) as Arc<dyn PositionRepository>,
        Arc::clone(&executor) as Arc<dyn TradeExecutor>,
        breakers,
        risk,
        monitor,
        error_handler,
        vec![ExitStrategy::Profit {
            target_percent: 50.0,
            trailing_stop_percent: None,
            partial_exit_percent: None,
        }],
    );

    Harness {
        bus,
        strategy,
        executor,
        price_feed,
        repo,
        trading,
        positions,
    }
}

fn pool(signature: &str) -> NewPoolEvent {
    NewPoolEvent {
        signature: signature.to_string(),
        dex: Dex::Raydium,
        pool_address: "P1".to_string(),
        token_a: "T1".to_string(),
        token_b: "BASE".to_string(),
        timestamp: Utc::now(),
    }
}

fn decision() -> TradeDecision {
    TradeDecision {
        should_trade: true,
        target_token: "T1".to_string(),
        base_token: "BASE".to_string(),
        pool_address: "P1".to_string(),
        trade_amount_usd: 100.0,
        expected_amount_out: 1000.0,
        price: 0.1,
        reason: "new pool momentum".to_string(),
        risk_score: 0.0,
    }
}

/// S1: pool discovery through evaluation, execution, monitoring, profit
/// exit, and a closed repository row with pnl 60 % / $60.
#[tokio::test]
async fn test_happy_path_buy_then_profit_exit() {
    let mut h = harness(false);
    h.strategy.set_decision("P1", decision());

    h.trading.handle_event(BotEvent::NewPool(pool("sigA"))).await;
    h.trading
        .handle_event(BotEvent::TradeDecision(decision()))
        .await;
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);

    // Position coordinator picks the fill up from the repository.
    h.positions
        .handle_trade_result(TradeResult {
            success: true,
            signature: Some("sigExec".into()),
            trade_id: Some("tr1".into()),
            position_id: Some("p1".into()),
            error: None,
            timestamp: Utc::now(),
        })
        .await;
    let machine = h.positions.machine("p1").unwrap();
    assert_eq!(machine.state(), PositionState::Monitoring);

    // First tick: +10 %, stays monitoring.
    h.price_feed.set_price("T1", 0.11);
    h.positions.monitoring_cycle().await;
    assert_eq!(machine.state(), PositionState::Monitoring);

    // Second tick: +60 %, profit target fires and the exit completes.
    h.price_feed.set_price("T1", 0.16);
    h.positions.monitoring_cycle().await;
    assert_eq!(machine.state(), PositionState::Closed);

    let ctx = machine.context();
    assert_eq!(ctx.exit_reason.as_deref(), Some("profit target"));
    assert!((ctx.pnl_percent.unwrap() - 60.0).abs() < 1e-9);
    assert!((ctx.pnl_usd.unwrap() - 60.0).abs() < 1e-9);

    let row = h.repo.get_position("p1").await.unwrap().unwrap();
    assert!(!row.is_open());
    assert_eq!(row.exit_trade_id.as_deref(), Some("tr2"));
    assert!((row.pnl_percent.unwrap() - 60.0).abs() < 1e-9);

    h.bus.flush().await;
}

/// S2: dry-run synthesizes DRY_RUN_* identifiers and never calls the
/// executor.
#[tokio::test]
async fn test_dry_run_synthesizes_result() {
    let mut h = harness(true);
    h.strategy.set_decision("P1", decision());

    // Capture trade results off the bus.
    use parking_lot::Mutex;
    use snipebot::domain::events::EventListener;
    struct ResultCapture {
        seen: Arc<Mutex<Vec<TradeResult>>>,
    }
    impl EventListener for ResultCapture {
        fn on_event(&self, event: &BotEvent) {
            if let BotEvent::TradeResult(result) = event {
                self.seen.lock().push(result.clone());
            }
        }
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    h.bus.subscribe(Arc::new(ResultCapture {
        seen: Arc::clone(&seen),
    }));

    h.trading.handle_event(BotEvent::NewPool(pool("sigA"))).await;
    h.trading
        .handle_event(BotEvent::TradeDecision(decision()))
        .await;
    h.bus.flush().await;

    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let result = &seen[0];
    assert!(result.success);
    assert_eq!(result.signature.as_deref(), Some(DRY_RUN_SIGNATURE));
    assert_eq!(result.trade_id.as_deref(), Some(DRY_RUN_TRADE));
    assert_eq!(result.position_id.as_deref(), Some(DRY_RUN_POSITION));
}

/// Property 6: duplicate NewPoolEvents with one signature produce one
/// workflow and at most one emitted decision.
#[tokio::test]
async fn test_duplicate_pool_events_are_idempotent() {
    let mut h = harness(true);
    h.strategy.set_decision("P1", decision());

    use snipebot::domain::events::EventListener;
    struct DecisionCounter {
        count: Arc<AtomicUsize>,
    }
    impl EventListener for DecisionCounter {
        fn on_event(&self, event: &BotEvent) {
            if matches!(event, BotEvent::TradeDecision(_)) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
    let count = Arc::new(AtomicUsize::new(0));
    h.bus.subscribe(Arc::new(DecisionCounter {
        count: Arc::clone(&count),
    }));

    h.trading.handle_event(BotEvent::NewPool(pool("sigA"))).await;
    h.trading.handle_event(BotEvent::NewPool(pool("sigA"))).await;
    h.trading.handle_event(BotEvent::NewPool(pool("sigA"))).await;
    h.bus.flush().await;

    assert_eq!(h.trading.workflow_count(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// S6: exposure 800, cap 1000, incoming 400 → EXPOSURE_LIMIT alert and
/// no tradeDecision emitted.
#[tokio::test]
async fn test_risk_gate_refuses_oversize_trade() {
    let bus = EventBus::new();
    let strategy = Arc::new(MockStrategyEngine::new());
    let repo = Arc::new(InMemoryPositionRepository::new());
    let executor = Arc::new(RecordingExecutor {
        repo: Arc::clone(&repo),
        calls: AtomicUsize::new(0),
    });
    let risk = Arc::new(RiskManager::new(
        RiskConfig {
            max_total_exposure_usd: 1000.0,
            max_single_position_usd: 500.0,
            ..RiskConfig::default()
        },
        bus.clone(),
    ));
    risk.set_exposure("T0", 800.0);

    let mut big = decision();
    big.trade_amount_usd = 400.0;
    strategy.set_decision("P1", big);

    use snipebot::domain::events::EventListener;
    use snipebot::domain::types::{AlertKind, AlertSeverity};
    struct AlertAndDecisionCapture {
        alerts: Arc<AtomicUsize>,
        decisions: Arc<AtomicUsize>,
    }
    impl EventListener for AlertAndDecisionCapture {
        fn on_event(&self, event: &BotEvent) {
            match event {
                BotEvent::Alert(alert)
                    if alert.kind == AlertKind::ExposureLimit
                        && alert.severity == AlertSeverity::Critical =>
                {
                    self.alerts.fetch_add(1, Ordering::SeqCst);
                }
                BotEvent::TradeDecision(_) => {
                    self.decisions.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }
    let alerts = Arc::new(AtomicUsize::new(0));
    let decisions = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Arc::new(AlertAndDecisionCapture {
        alerts: Arc::clone(&alerts),
        decisions: Arc::clone(&decisions),
    }));

    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let monitor = Arc::new(MarketMonitor::new(
        MonitorConfig::default(),
        Arc::new(MockBlockchainAdapter::new()),
        Arc::clone(&breakers),
        bus.clone(),
    ));
    let mut trading = TradingCoordinator::new(
        TradingCoordinatorConfig::default(),
        bus.clone(),
        strategy as Arc<dyn snipebot::domain::ports::StrategyEngine>,
        executor.clone() as Arc<dyn TradeExecutor>,
        risk,
        Arc::new(SlippageProtection::new(SlippageConfig::default())),
        monitor,
        breakers,
        Arc::new(ErrorHandler::new(bus.clone())),
    );
    trading.handle_event(BotEvent::NewPool(pool("sigC"))).await;
    bus.flush().await;

    assert_eq!(alerts.load(Ordering::SeqCst), 1, "EXPOSURE_LIMIT expected");
    assert_eq!(decisions.load(Ordering::SeqCst), 0, "decision must not emit");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(trading.workflow_count(), 0);
}
