//! Historical candle access.

use chrono::{DateTime, Utc};

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TradedeskError;

pub trait DataPort {
    /// Candles with `start <= open_time <= end`, in stored order.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradedeskError>;

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, TradedeskError>;

    /// First and last open time plus candle count, or `None` for an empty series.
    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradedeskError>;
}
