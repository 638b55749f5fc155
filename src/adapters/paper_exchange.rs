//! In-memory exchange that fills every accepted order at once.
//!
//! Holds one base/quote balance pair (BTC/USDT) and the last price per
//! symbol fed by the market ticker. Buys can be capped per UTC day.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::error::TradedeskError;
use crate::domain::order::{check_order, Balances, OrderAck, OrderRequest, OrderSide};
use crate::ports::exchange_port::ExchangeGateway;

struct PaperState {
    balances: Balances,
    prices: HashMap<String, f64>,
    next_order_id: u64,
    /// UTC day of the last counted buy and the buys filled on it.
    buys_today: (Option<NaiveDate>, u32),
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
    max_order_value: f64,
    max_buys_per_day: Option<u32>,
}

impl PaperExchange {
    pub fn new(balances: Balances, max_order_value: f64) -> Self {
        PaperExchange {
            state: Mutex::new(PaperState {
                balances,
                prices: HashMap::new(),
                next_order_id: 1,
                buys_today: (None, 0),
            }),
            max_order_value,
            max_buys_per_day: None,
        }
    }

    /// Reject buys once `limit` have filled on the current UTC day.
    /// Sells are never capped.
    pub fn with_daily_trade_limit(mut self, limit: u32) -> Self {
        self.max_buys_per_day = Some(limit);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>, TradedeskError> {
        self.state
            .lock()
            .map_err(|_| TradedeskError::external("paper exchange", "state lock poisoned"))
    }

    /// Fill `order` as of `now`; the UTC date of `now` selects the trade-limit day.
    fn fill(&self, order: &OrderRequest, now: DateTime<Utc>) -> Result<OrderAck, TradedeskError> {
        let mut state = self.lock()?;
        let market = state.prices.get(&order.symbol).copied().ok_or_else(|| {
            TradedeskError::invalid_order(format!("no market price for {}", order.symbol))
        })?;
        let price = order.execution_price(market)?;

        let today = now.date_naive();
        let buys_today = match state.buys_today {
            (Some(day), n) if day == today => n,
            _ => 0,
        };
        if let Some(limit) = self.max_buys_per_day {
            if order.side == OrderSide::Buy && buys_today >= limit {
                return Err(TradedeskError::invalid_order(format!(
                    "daily trade limit reached ({buys_today} of {limit} buys on {today})"
                )));
            }
        }
        check_order(order, price, &state.balances, self.max_order_value)?;

        let value = order.quantity * price;
        match order.side {
            OrderSide::Buy => {
                state.balances.quote -= value;
                state.balances.base += order.quantity;
                state.buys_today = (Some(today), buys_today + 1);
            }
            OrderSide::Sell => {
                state.balances.base -= order.quantity;
                state.balances.quote += value;
            }
        }
        let order_id = state.next_order_id;
        state.next_order_id += 1;

        log::info!(
            "paper order #{order_id}: {} {} {} @ {price:.4}",
            order.side,
            order.quantity,
            order.symbol
        );
        Ok(OrderAck {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            status: "filled".to_string(),
            placed_at: now,
            position_id: None,
        })
    }
}

impl ExchangeGateway for PaperExchange {
    fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, TradedeskError> {
        self.fill(order, Utc::now())
    }

    fn balances(&self) -> Result<Balances, TradedeskError> {
        Ok(self.lock()?.balances)
    }

    fn last_price(&self, symbol: &str) -> Result<f64, TradedeskError> {
        self.lock()?
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| TradedeskError::external("paper exchange", format!("no price for {symbol}")))
    }

    fn record_price(&self, symbol: &str, price: f64) -> Result<(), TradedeskError> {
        self.lock()?.prices.insert(symbol.to_string(), price);
        Ok(())
    }
}
