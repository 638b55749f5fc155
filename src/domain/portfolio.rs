//! Portfolio aggregation and equity tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::position_manager::PositionManager;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
}

/// Account-level view derived from the position ledger on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub cash_balance: f64,
    pub invested_value: f64,
    pub total_value: f64,
    /// (total_value − initial_capital) / initial_capital × 100
    pub total_pnl_percent: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    pub closed_trades: usize,
}

impl PortfolioSummary {
    /// Value the ledger at `prices`. Symbols without a price are valued at entry.
    pub fn aggregate(manager: &PositionManager, prices: &HashMap<String, f64>) -> Self {
        let invested_value = manager.invested_value(prices);
        let total_value = manager.cash() + invested_value;
        let initial = manager.initial_capital();
        let total_pnl_percent = if initial > 0.0 {
            (total_value - initial) / initial * 100.0
        } else {
            0.0
        };
        let unrealized_pnl = manager
            .open_positions()
            .map(|p| {
                let price = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.unrealized_pnl(price)
            })
            .sum();

        PortfolioSummary {
            cash_balance: manager.cash(),
            invested_value,
            total_value,
            total_pnl_percent,
            realized_pnl: manager.trades().iter().map(|t| t.realized_pnl).sum(),
            unrealized_pnl,
            open_positions: manager.open_count(),
            closed_trades: manager.trades().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{CloseReason, Direction};
    use crate::domain::position_manager::ExecutionCosts;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_portfolio() {
        let pm = PositionManager::new(100_000.0, ExecutionCosts::default());
        let summary = PortfolioSummary::aggregate(&pm, &HashMap::new());
        assert!((summary.cash_balance - 100_000.0).abs() < f64::EPSILON);
        assert!((summary.total_value - 100_000.0).abs() < f64::EPSILON);
        assert!(summary.invested_value.abs() < f64::EPSILON);
        assert!(summary.total_pnl_percent.abs() < f64::EPSILON);
        assert_eq!(summary.open_positions, 0);
    }

    #[test]
    fn summary_values_open_long_and_short() {
        let mut pm = PositionManager::new(10_000.0, ExecutionCosts::default());
        pm.open("BTCUSDT", Direction::Long, 10.0, 100.0, None, None, t0())
            .unwrap();
        pm.open("ETHUSDT", Direction::Short, 10.0, 50.0, None, None, t0())
            .unwrap();
        let prices = HashMap::from([
            ("BTCUSDT".to_string(), 110.0),
            ("ETHUSDT".to_string(), 40.0),
        ]);

        let summary = PortfolioSummary::aggregate(&pm, &prices);
        // cash 10000 - 1000 - 500; long worth 1100; short escrow 500 + 100 gain
        assert!((summary.cash_balance - 8_500.0).abs() < 1e-9);
        assert!((summary.invested_value - 1_700.0).abs() < 1e-9);
        assert!((summary.total_value - 10_200.0).abs() < 1e-9);
        assert!((summary.total_pnl_percent - 2.0).abs() < 1e-9);
        assert!((summary.unrealized_pnl - 200.0).abs() < 1e-9);
        assert_eq!(summary.open_positions, 2);
    }

    #[test]
    fn realized_pnl_counts_closed_trades() {
        let mut pm = PositionManager::new(10_000.0, ExecutionCosts::default());
        let pos = pm
            .open("BTCUSDT", Direction::Long, 10.0, 100.0, None, None, t0())
            .unwrap();
        pm.close(pos.id, CloseReason::Manual, 105.0, t0()).unwrap();

        let summary = PortfolioSummary::aggregate(&pm, &HashMap::new());
        assert!((summary.realized_pnl - 50.0).abs() < 1e-9);
        assert!((summary.total_value - 10_050.0).abs() < 1e-9);
        assert_eq!(summary.closed_trades, 1);
    }
}
