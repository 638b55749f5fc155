//! tradedesk: strategy backtesting, parameter search and a paper trading desk.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the async live path in [`live`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod live;
pub mod cli;
