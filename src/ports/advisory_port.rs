//! Qualitative market advisory (e.g. a language-model analyst).
//!
//! Implementations may block; the live loop calls them off the async
//! runtime with a timeout and treats any failure as "no advisory".

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TradedeskError;
use crate::domain::indicator::IndicatorSet;
use crate::domain::signal::AdvisoryRecord;

#[derive(Debug, Clone)]
pub struct AdvisoryRequest {
    pub symbol: String,
    pub last_price: f64,
    pub frames: Vec<(Timeframe, IndicatorSet)>,
    /// Most recent candles of the primary timeframe, oldest first.
    pub recent_candles: Vec<Candle>,
}

pub trait AdvisoryPort: Send + Sync {
    fn analyze(&self, request: &AdvisoryRequest) -> Result<AdvisoryRecord, TradedeskError>;
}
