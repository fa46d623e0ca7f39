pub mod app;
pub mod data_management;
pub mod error_handler;
pub mod exit_strategies;
pub mod market_monitor;
pub mod position_coordinator;
pub mod recovery;
pub mod risk_manager;
pub mod slippage;
pub mod trading_coordinator;
