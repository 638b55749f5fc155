//! Single owner of open positions, closed trades and the cash ledger.
//!
//! Every mutation (open, edit, close, exit evaluation) goes through
//! `PositionManager`, so a position id is either open or has exactly one
//! `Trade` in the history, never both. Fills are adjusted for slippage and
//! charged a percentage commission. Shorts escrow their entry notional.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::candle::Candle;
use super::error::TradedeskError;
use super::position::{
    CloseReason, Direction, LevelEdit, Position, PositionStatus, Trade, validate_levels,
};

/// Fill cost model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutionCosts {
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

/// commission = trade_value × pct / 100
pub fn calculate_commission(trade_value: f64, commission_pct: f64) -> f64 {
    trade_value * commission_pct / 100.0
}

/// Buying pays up, selling receives less.
pub fn apply_slippage_entry(direction: Direction, market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + direction.sign() * slippage_pct / 100.0)
}

pub fn apply_slippage_exit(direction: Direction, market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - direction.sign() * slippage_pct / 100.0)
}

/// Which open positions `evaluate_exits` considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitScope {
    All,
    Position(u64),
}

/// An open position valued at a current price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
    pub position_size_percent: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PositionManager {
    cash: f64,
    initial_capital: f64,
    costs: ExecutionCosts,
    next_id: u64,
    open: BTreeMap<u64, Position>,
    history: Vec<Trade>,
}

impl PositionManager {
    pub fn new(initial_capital: f64, costs: ExecutionCosts) -> Self {
        PositionManager {
            cash: initial_capital,
            initial_capital,
            costs,
            next_id: 1,
            open: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn costs(&self) -> ExecutionCosts {
        self.costs
    }

    /// Validate an entry without opening it. Returns the slipped fill and
    /// the commission `open` would charge.
    pub fn check_open(
        &self,
        direction: Direction,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(f64, f64), TradedeskError> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(TradedeskError::invalid_order(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(TradedeskError::invalid_order(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }

        let fill = apply_slippage_entry(direction, entry_price, self.costs.slippage_pct);
        validate_levels(direction, Some(fill), stop_loss, take_profit)?;

        let cost = quantity * fill;
        let commission = calculate_commission(cost, self.costs.commission_pct);
        let total = cost + commission;
        if total > self.cash {
            return Err(TradedeskError::InsufficientCapital {
                required: total,
                available: self.cash,
            });
        }
        Ok((fill, commission))
    }

    /// Open a position and debit notional plus commission.
    ///
    /// `entry_price` is the market price; the stored entry is the slipped
    /// fill. Nothing changes if validation or the cash check fails.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        symbol: &str,
        direction: Direction,
        quantity: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        opened_at: DateTime<Utc>,
    ) -> Result<Position, TradedeskError> {
        let (fill, commission) =
            self.check_open(direction, quantity, entry_price, stop_loss, take_profit)?;

        self.cash -= quantity * fill + commission;
        let id = self.next_id;
        self.next_id += 1;

        let position = Position {
            id,
            symbol: symbol.to_string(),
            direction,
            quantity,
            entry_price: fill,
            stop_loss,
            take_profit,
            opened_at,
            status: PositionStatus::Open,
            entry_commission: commission,
        };
        self.open.insert(id, position.clone());
        log::debug!(
            "opened #{id} {direction} {quantity:.6} {symbol} @ {fill:.4} (commission {commission:.4})"
        );
        Ok(position)
    }

    /// Set, clear or keep the stop and target of an open position.
    pub fn edit(
        &mut self,
        id: u64,
        stop_loss: LevelEdit,
        take_profit: LevelEdit,
    ) -> Result<Position, TradedeskError> {
        let position = self
            .open
            .get_mut(&id)
            .ok_or(TradedeskError::PositionNotFound { id })?;

        let stop = stop_loss.apply(position.stop_loss);
        let target = take_profit.apply(position.take_profit);
        validate_levels(position.direction, None, stop, target)?;

        position.stop_loss = stop;
        position.take_profit = target;
        Ok(position.clone())
    }

    /// Close a position at `close_price` (before slippage) and record its trade.
    pub fn close(
        &mut self,
        id: u64,
        reason: CloseReason,
        close_price: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<Trade, TradedeskError> {
        if !close_price.is_finite() || close_price <= 0.0 {
            return Err(TradedeskError::invalid_order(format!(
                "close price must be positive, got {close_price}"
            )));
        }
        let mut position = self
            .open
            .remove(&id)
            .ok_or(TradedeskError::PositionNotFound { id })?;
        position.status = PositionStatus::Closed;

        let fill = apply_slippage_exit(position.direction, close_price, self.costs.slippage_pct);
        let exit_value = position.notional(fill);
        let exit_commission = calculate_commission(exit_value, self.costs.commission_pct);

        self.cash += position.settlement_value(fill) - exit_commission;

        let realized_pnl =
            position.unrealized_pnl(fill) - position.entry_commission - exit_commission;
        let trade = Trade {
            position_id: position.id,
            symbol: position.symbol,
            direction: position.direction,
            quantity: position.quantity,
            entry_price: position.entry_price,
            close_price: fill,
            opened_at: position.opened_at,
            closed_at,
            realized_pnl,
            realized_pnl_percent: realized_pnl / (position.quantity * position.entry_price) * 100.0,
            commission: position.entry_commission + exit_commission,
            close_reason: reason,
        };
        log::debug!(
            "closed #{} {} @ {:.4} ({}) pnl {:.4}",
            trade.position_id,
            trade.symbol,
            fill,
            reason,
            realized_pnl
        );
        self.history.push(trade.clone());
        Ok(trade)
    }

    /// Close every in-scope position of `symbol` whose stop or target lies
    /// inside `candle`'s range.
    ///
    /// Triggered ids are collected first, then closed in id order.
    pub fn evaluate_exits(
        &mut self,
        scope: ExitScope,
        symbol: &str,
        candle: &Candle,
    ) -> Result<Vec<Trade>, TradedeskError> {
        if let ExitScope::Position(id) = scope {
            if !self.open.contains_key(&id) {
                return Err(TradedeskError::PositionNotFound { id });
            }
        }

        let triggered: Vec<(u64, CloseReason, f64)> = self
            .open
            .values()
            .filter(|p| p.symbol == symbol)
            .filter(|p| match scope {
                ExitScope::All => true,
                ExitScope::Position(id) => p.id == id,
            })
            .filter_map(|p| {
                p.exit_trigger(candle)
                    .map(|(reason, fill)| (p.id, reason, fill))
            })
            .collect();

        let mut trades = Vec::with_capacity(triggered.len());
        for (id, reason, fill) in triggered {
            trades.push(self.close(id, reason, fill, candle.open_time)?);
        }
        Ok(trades)
    }

    pub fn get(&self, id: u64) -> Option<&Position> {
        self.open.get(&id)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Position> + 'a {
        self.open.values().filter(move |p| p.symbol == symbol)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.history
    }

    fn price_for(position: &Position, prices: &HashMap<String, f64>) -> f64 {
        prices
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price)
    }

    /// Settlement value of all open positions. Symbols without a price are
    /// valued at their entry.
    pub fn invested_value(&self, prices: &HashMap<String, f64>) -> f64 {
        self.open
            .values()
            .map(|p| p.settlement_value(Self::price_for(p, prices)))
            .sum()
    }

    /// cash + invested value
    pub fn equity(&self, prices: &HashMap<String, f64>) -> f64 {
        self.cash + self.invested_value(prices)
    }

    /// Position notional / total value × 100, computed on read.
    pub fn position_size_percent(&self, id: u64, prices: &HashMap<String, f64>) -> Option<f64> {
        let position = self.open.get(&id)?;
        let total = self.equity(prices);
        if total <= 0.0 {
            return Some(0.0);
        }
        Some(position.notional(Self::price_for(position, prices)) / total * 100.0)
    }

    pub fn views(&self, prices: &HashMap<String, f64>) -> Vec<PositionView> {
        let total = self.equity(prices);
        self.open
            .values()
            .map(|p| {
                let price = Self::price_for(p, prices);
                PositionView {
                    id: p.id,
                    symbol: p.symbol.clone(),
                    direction: p.direction,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    current_price: price,
                    stop_loss: p.stop_loss,
                    take_profit: p.take_profit,
                    unrealized_pnl: p.unrealized_pnl(price),
                    unrealized_pnl_percent: p.unrealized_pnl_percent(price),
                    position_size_percent: if total > 0.0 {
                        p.notional(price) / total * 100.0
                    } else {
                        0.0
                    },
                    opened_at: p.opened_at,
                }
            })
            .collect()
    }
}
