//! Order request/response shapes exchanged with an exchange gateway, plus
//! the pre-trade risk check applied before anything is sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::TradedeskError;
use super::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn direction(&self) -> Direction {
        match self {
            OrderSide::Buy => Direction::Long,
            OrderSide::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default, rename = "type")]
    pub order_type: OrderType,
    /// Required for limit orders; market orders fill at the last price.
    #[serde(default)]
    pub price: Option<f64>,
    pub quantity: f64,
    #[serde(default, alias = "stopLoss")]
    pub stop_loss: Option<f64>,
    #[serde(default, alias = "takeProfit")]
    pub take_profit: Option<f64>,
}

impl OrderRequest {
    /// Price the order would execute at given the current market price.
    pub fn execution_price(&self, market_price: f64) -> Result<f64, TradedeskError> {
        let price = match self.order_type {
            OrderType::Market => market_price,
            OrderType::Limit => self
                .price
                .ok_or_else(|| TradedeskError::invalid_order("limit orders need a price"))?,
        };
        if !price.is_finite() || price <= 0.0 {
            return Err(TradedeskError::invalid_order(format!(
                "price must be positive, got {price}"
            )));
        }
        Ok(price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub status: String,
    pub placed_at: DateTime<Utc>,
    /// Ledger position opened for this fill, when one was recorded.
    pub position_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    /// Base asset units (BTC).
    pub base: f64,
    /// Quote currency units (USDT).
    pub quote: f64,
}

/// Reject orders above `max_order_value` or not covered by the balance they
/// spend: quote for buys, base for sells.
pub fn check_order(
    order: &OrderRequest,
    price: f64,
    balances: &Balances,
    max_order_value: f64,
) -> Result<(), TradedeskError> {
    if order.symbol.trim().is_empty() {
        return Err(TradedeskError::invalid_order("symbol is required"));
    }
    if !order.quantity.is_finite() || order.quantity <= 0.0 {
        return Err(TradedeskError::invalid_order(format!(
            "quantity must be positive, got {}",
            order.quantity
        )));
    }

    let value = order.quantity * price;
    if value > max_order_value {
        return Err(TradedeskError::invalid_order(format!(
            "order value {value:.2} exceeds the {max_order_value:.2} limit"
        )));
    }

    match order.side {
        OrderSide::Buy if value > balances.quote => Err(TradedeskError::InsufficientCapital {
            required: value,
            available: balances.quote,
        }),
        OrderSide::Sell if order.quantity > balances.base => {
            Err(TradedeskError::InsufficientCapital {
                required: order.quantity,
                available: balances.base,
            })
        }
        _ => Ok(()),
    }
}
