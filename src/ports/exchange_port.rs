//! Exchange connectivity: the request/response shape the engine needs and
//! nothing of the wire protocol behind it.

use crate::domain::error::TradedeskError;
use crate::domain::order::{Balances, OrderAck, OrderRequest};

pub trait ExchangeGateway: Send + Sync {
    fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, TradedeskError>;
    fn balances(&self) -> Result<Balances, TradedeskError>;
    fn last_price(&self, symbol: &str) -> Result<f64, TradedeskError>;

    /// Feed an observed market price. Venues with their own feed ignore it.
    fn record_price(&self, _symbol: &str, _price: f64) -> Result<(), TradedeskError> {
        Ok(())
    }
}
