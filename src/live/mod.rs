//! Live trading path: the shared position desk, periodic tickers and the
//! engine that ties market data, signals and the exchange together.

pub mod advisory;
pub mod desk;
pub mod runner;
pub mod scheduler;

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::candle::Timeframe;
use crate::domain::order::Balances;

pub use advisory::{AdvisoryClient, AdvisoryPolicy};
pub use desk::{LedgerSnapshot, PositionDesk};
pub use runner::{execute_order, LiveEngine, MarketAnalysis};
pub use scheduler::Ticker;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub symbols: Vec<String>,
    /// Indicator timeframes, shortest first.
    pub timeframes: Vec<Timeframe>,
    /// Timeframe whose bars drive exits and signal prices.
    pub primary_timeframe: Timeframe,
    pub positions_interval: Duration,
    pub market_interval: Duration,
    pub strategy_interval: Duration,
    pub advisory: AdvisoryPolicy,
    /// Send buy/sell signals to the exchange without a manual order.
    pub auto_execute: bool,
    pub listen: SocketAddr,
    /// Candles loaded per symbol and timeframe on each market refresh.
    pub history_candles: usize,
    pub initial_balances: Balances,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec![Timeframe::H1, Timeframe::H4, Timeframe::D1],
            primary_timeframe: Timeframe::H1,
            positions_interval: Duration::from_secs(30),
            market_interval: Duration::from_secs(60),
            strategy_interval: Duration::from_secs(30 * 60),
            advisory: AdvisoryPolicy::default(),
            auto_execute: false,
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            history_candles: 250,
            initial_balances: Balances {
                base: 0.0,
                quote: 10_000.0,
            },
        }
    }
}
