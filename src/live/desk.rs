//! Single-writer position ledger for the live path.
//!
//! All mutations (manual edits and closes, price-driven exits, new
//! positions) go through one mutex-guarded `PositionManager`. After every
//! successful mutation an immutable `LedgerSnapshot` is published on a
//! watch channel; readers take the latest snapshot and never wait on a
//! writer. The lock is never held across an `.await`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::domain::candle::Candle;
use crate::domain::error::TradedeskError;
use crate::domain::portfolio::PortfolioSummary;
use crate::domain::position::{CloseReason, Direction, LevelEdit, Position, Trade};
use crate::domain::position_manager::{ExitScope, PositionManager, PositionView};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    /// Increments on every published mutation.
    pub version: u64,
    pub positions: Vec<PositionView>,
    pub trades: Vec<Trade>,
    pub summary: PortfolioSummary,
    pub prices: HashMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

struct DeskState {
    manager: PositionManager,
    prices: HashMap<String, f64>,
    version: u64,
}

impl DeskState {
    fn snapshot(&self, now: DateTime<Utc>) -> LedgerSnapshot {
        LedgerSnapshot {
            version: self.version,
            positions: self.manager.views(&self.prices),
            trades: self.manager.trades().to_vec(),
            summary: PortfolioSummary::aggregate(&self.manager, &self.prices),
            prices: self.prices.clone(),
            updated_at: now,
        }
    }
}

pub struct PositionDesk {
    state: Mutex<DeskState>,
    tx: watch::Sender<Arc<LedgerSnapshot>>,
}

impl PositionDesk {
    pub fn new(manager: PositionManager) -> Self {
        let state = DeskState {
            manager,
            prices: HashMap::new(),
            version: 0,
        };
        let (tx, _rx) = watch::channel(Arc::new(state.snapshot(Utc::now())));
        PositionDesk {
            state: Mutex::new(state),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<LedgerSnapshot>> {
        self.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        self.tx.borrow().clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeskState>, TradedeskError> {
        self.state
            .lock()
            .map_err(|_| TradedeskError::external("position desk", "ledger lock poisoned"))
    }

    /// Run `f` under the ledger lock and publish a snapshot if it succeeds.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut DeskState) -> Result<T, TradedeskError>,
    ) -> Result<T, TradedeskError> {
        let mut state = self.lock()?;
        let out = f(&mut state)?;
        state.version += 1;
        let snapshot = Arc::new(state.snapshot(Utc::now()));
        self.tx.send_replace(snapshot);
        Ok(out)
    }

    /// Whether `open` would accept these arguments right now.
    pub fn check_open(
        &self,
        direction: Direction,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), TradedeskError> {
        self.lock()?
            .manager
            .check_open(direction, quantity, entry_price, stop_loss, take_profit)
            .map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        opened_at: DateTime<Utc>,
    ) -> Result<Position, TradedeskError> {
        self.mutate(|state| {
            let position = state.manager.open(
                symbol,
                direction,
                quantity,
                entry_price,
                stop_loss,
                take_profit,
                opened_at,
            )?;
            state.prices.entry(symbol.to_string()).or_insert(entry_price);
            Ok(position)
        })
    }

    pub fn edit(
        &self,
        id: u64,
        stop_loss: LevelEdit,
        take_profit: LevelEdit,
    ) -> Result<Position, TradedeskError> {
        self.mutate(|state| state.manager.edit(id, stop_loss, take_profit))
    }

    /// Close at `price`, or at the last observed price for the symbol.
    pub fn close(
        &self,
        id: u64,
        reason: CloseReason,
        price: Option<f64>,
        closed_at: DateTime<Utc>,
    ) -> Result<Trade, TradedeskError> {
        self.mutate(|state| {
            let position = state
                .manager
                .get(id)
                .ok_or(TradedeskError::PositionNotFound { id })?;
            let price = price
                .or_else(|| state.prices.get(&position.symbol).copied())
                .unwrap_or(position.entry_price);
            state.manager.close(id, reason, price, closed_at)
        })
    }

    /// Record a tick and close any position of `symbol` it triggers.
    pub fn update_price(
        &self,
        symbol: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Trade>, TradedeskError> {
        self.apply_candle(symbol, &Candle::from_tick(at, price))
    }

    /// Evaluate exits against a full bar and mark the symbol at its close.
    pub fn apply_candle(&self, symbol: &str, candle: &Candle) -> Result<Vec<Trade>, TradedeskError> {
        self.mutate(|state| {
            state.prices.insert(symbol.to_string(), candle.close);
            let trades = state.manager.evaluate_exits(ExitScope::All, symbol, candle)?;
            for t in &trades {
                log::info!(
                    "#{} {} closed by {} at {:.4}, pnl {:.2}",
                    t.position_id,
                    t.symbol,
                    t.close_reason,
                    t.close_price,
                    t.realized_pnl
                );
            }
            Ok(trades)
        })
    }

    /// Open position ids and directions for `symbol`.
    pub fn holdings(&self, symbol: &str) -> Result<Vec<(u64, Direction, f64)>, TradedeskError> {
        let state = self.lock()?;
        Ok(state
            .manager
            .open_for_symbol(symbol)
            .map(|p| (p.id, p.direction, p.quantity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position_manager::ExecutionCosts;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn desk() -> PositionDesk {
        PositionDesk::new(PositionManager::new(10_000.0, ExecutionCosts::default()))
    }

    #[test]
    fn mutations_publish_new_versions() {
        let desk = desk();
        let rx = desk.subscribe();
        assert_eq!(rx.borrow().version, 0);

        let pos = desk
            .open("BTCUSDT", Direction::Long, 1.0, 100.0, Some(95.0), Some(110.0), t0())
            .unwrap();
        assert_eq!(rx.borrow().version, 1);
        assert_eq!(rx.borrow().positions.len(), 1);

        desk.edit(pos.id, LevelEdit::Set(97.0), LevelEdit::Keep).unwrap();
        let snap = desk.snapshot();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.positions[0].stop_loss, Some(97.0));
        assert_eq!(snap.positions[0].take_profit, Some(110.0));
    }

    #[test]
    fn failed_mutation_publishes_nothing() {
        let desk = desk();
        assert!(desk.edit(42, LevelEdit::Set(1.0), LevelEdit::Keep).is_err());
        assert_eq!(desk.snapshot().version, 0);
    }

    #[test]
    fn tick_through_stop_closes_position() {
        let desk = desk();
        desk.open("BTCUSDT", Direction::Long, 1.0, 100.0, Some(95.0), Some(110.0), t0())
            .unwrap();
        assert!(desk.update_price("BTCUSDT", 99.0, t0()).unwrap().is_empty());
        let trades = desk.update_price("BTCUSDT", 94.0, t0()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].close_reason, CloseReason::StopLoss);

        let snap = desk.snapshot();
        assert!(snap.positions.is_empty());
        assert_eq!(snap.trades.len(), 1);
    }

    #[test]
    fn manual_close_uses_last_price() {
        let desk = desk();
        let pos = desk
            .open("BTCUSDT", Direction::Long, 2.0, 100.0, None, None, t0())
            .unwrap();
        desk.update_price("BTCUSDT", 104.0, t0()).unwrap();
        let trade = desk.close(pos.id, CloseReason::Manual, None, t0()).unwrap();
        assert!((trade.close_price - 104.0).abs() < 1e-9);
        assert!((trade.realized_pnl - 8.0).abs() < 1e-9);
        assert!(matches!(
            desk.close(pos.id, CloseReason::Manual, None, t0()),
            Err(TradedeskError::PositionNotFound { .. })
        ));
    }

    #[test]
    fn snapshot_summary_tracks_prices() {
        let desk = desk();
        desk.open("BTCUSDT", Direction::Long, 10.0, 100.0, None, None, t0())
            .unwrap();
        desk.update_price("BTCUSDT", 110.0, t0()).unwrap();
        let summary = desk.snapshot().summary.clone();
        assert!((summary.total_value - 10_100.0).abs() < 1e-9);
        assert!((summary.total_pnl_percent - 1.0).abs() < 1e-9);
    }
}
