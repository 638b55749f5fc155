//! Core domain types and logic: market data, indicators, signals, the
//! position ledger, backtesting and optimisation. No I/O lives here.

pub mod backtest;
pub mod candle;
pub mod config_validation;
pub mod error;
pub mod indicator;
pub mod market_data;
pub mod metrics;
pub mod optimizer;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod position_manager;
pub mod signal;
pub mod strategy;
