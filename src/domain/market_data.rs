//! Append-only, gap-aware candle storage keyed by symbol and timeframe.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use super::candle::{Candle, Timeframe};
use super::error::{GapKind, TradedeskError};

/// A discontinuity observed while appending or replaying candles.
#[derive(Debug, Clone, PartialEq)]
pub struct DataGapEvent {
    pub at: DateTime<Utc>,
    pub kind: GapKind,
}

/// Classify `candle` against the previous accepted candle of the same series.
///
/// Returns `None` when the candle continues the series normally.
pub fn check_continuity(
    previous: Option<&Candle>,
    candle: &Candle,
    timeframe: Timeframe,
) -> Option<GapKind> {
    if !candle.is_consistent() {
        return Some(GapKind::InvalidPrices);
    }
    let prev = previous?;
    if candle.open_time <= prev.open_time {
        return Some(GapKind::OutOfOrder);
    }

    let slack = match timeframe {
        Timeframe::Mo1 => Duration::days(2),
        _ => Duration::zero(),
    };
    let delta = candle.open_time - prev.open_time;
    if delta > timeframe.duration() + slack {
        let whole = (delta - slack).num_minutes() / timeframe.minutes();
        return Some(GapKind::Missing {
            intervals: (whole - 1).max(1),
        });
    }
    None
}

#[derive(Debug, Clone)]
pub struct CandleSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    candles: Vec<Candle>,
    gaps: Vec<DataGapEvent>,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        CandleSeries {
            symbol: symbol.into(),
            timeframe,
            candles: Vec::new(),
            gaps: Vec::new(),
        }
    }

    /// Append one candle.
    ///
    /// Out-of-order and malformed candles are rejected with `DataGap`; the
    /// series is left untouched. A candle after missing intervals is stored and
    /// the gap is recorded and returned.
    pub fn append(&mut self, candle: Candle) -> Result<Option<DataGapEvent>, TradedeskError> {
        match check_continuity(self.candles.last(), &candle, self.timeframe) {
            Some(kind @ (GapKind::OutOfOrder | GapKind::InvalidPrices)) => {
                Err(TradedeskError::DataGap {
                    symbol: self.symbol.clone(),
                    at: candle.open_time,
                    kind,
                })
            }
            Some(kind @ GapKind::Missing { .. }) => {
                let event = DataGapEvent {
                    at: candle.open_time,
                    kind,
                };
                self.gaps.push(event.clone());
                self.candles.push(candle);
                Ok(Some(event))
            }
            None => {
                self.candles.push(candle);
                Ok(None)
            }
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn gaps(&self) -> &[DataGapEvent] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn retain_last(&mut self, keep: usize) -> usize {
        let excess = self.candles.len().saturating_sub(keep);
        if excess == 0 {
            return 0;
        }
        self.candles.drain(..excess);
        if let Some(first) = self.candles.first().map(|c| c.open_time) {
            self.gaps.retain(|g| g.at >= first);
        } else {
            self.gaps.clear();
        }
        excess
    }

    /// The most recent `n` candles (fewer if the series is shorter).
    pub fn tail(&self, n: usize) -> &[Candle] {
        let start = self.candles.len().saturating_sub(n);
        &self.candles[start..]
    }

    /// Candles with `start <= open_time <= end`.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
        let lo = self.candles.partition_point(|c| c.open_time < start);
        let hi = self.candles.partition_point(|c| c.open_time <= end);
        if lo >= hi { &[] } else { &self.candles[lo..hi] }
    }
}

/// Normalised candle series for every (symbol, timeframe) pair seen.
#[derive(Debug, Default, Clone)]
pub struct MarketDataStore {
    series: HashMap<(String, Timeframe), CandleSeries>,
}

impl MarketDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candle: Candle,
    ) -> Result<Option<DataGapEvent>, TradedeskError> {
        self.series
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| CandleSeries::new(symbol, timeframe))
            .append(candle)
    }

    /// Append the candles that are newer than what is already stored.
    ///
    /// Candles at or before the last stored `open_time` are skipped, so a
    /// refreshed window that overlaps existing data is merged in place. A
    /// malformed candle is logged and dropped; the rest of the batch is still
    /// appended. Returns the number of candles appended.
    pub fn append_newer(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candles: impl IntoIterator<Item = Candle>,
    ) -> usize {
        let series = self
            .series
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| CandleSeries::new(symbol, timeframe));

        let mut appended = 0;
        for candle in candles {
            if let Some(last) = series.last() {
                if candle.open_time <= last.open_time {
                    continue;
                }
            }
            match series.append(candle) {
                Ok(Some(event)) => log::warn!(
                    "[{} {}] {} at {}",
                    symbol,
                    timeframe,
                    event.kind,
                    event.at
                ),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[{symbol} {timeframe}] candle skipped: {e}");
                    continue;
                }
            }
            appended += 1;
        }
        appended
    }

    /// Drop the oldest candles of a series beyond the newest `keep`.
    ///
    /// Gap events older than the first retained candle go with them.
    /// Returns the number of candles dropped.
    pub fn retain_last(&mut self, symbol: &str, timeframe: Timeframe, keep: usize) -> usize {
        match self.series.get_mut(&(symbol.to_string(), timeframe)) {
            Some(series) => series.retain_last(keep),
            None => 0,
        }
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&(symbol.to_string(), timeframe))
    }

    pub fn candles(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.series(symbol, timeframe)
            .map(|s| s.candles())
            .unwrap_or(&[])
    }

    pub fn last_close(&self, symbol: &str, timeframe: Timeframe) -> Option<f64> {
        self.series(symbol, timeframe)
            .and_then(|s| s.last())
            .map(|c| c.close)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle_at(hour: i64, close: f64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            open_time: base + Duration::hours(hour),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 10.0 * close,
        }
    }

    #[test]
    fn append_in_order() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::H1);
        assert!(series.append(candle_at(0, 100.0)).unwrap().is_none());
        assert!(series.append(candle_at(1, 101.0)).unwrap().is_none());
        assert_eq!(series.len(), 2);
        assert!(series.gaps().is_empty());
    }

    #[test]
    fn out_of_order_is_rejected_without_mutation() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::H1);
        series.append(candle_at(0, 100.0)).unwrap();
        series.append(candle_at(1, 101.0)).unwrap();

        let err = series.append(candle_at(1, 102.0)).unwrap_err();
        assert!(matches!(
            err,
            TradedeskError::DataGap {
                kind: GapKind::OutOfOrder,
                ..
            }
        ));
        assert_eq!(series.len(), 2);
        assert!((series.last().unwrap().close - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_intervals_are_recorded() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::H1);
        series.append(candle_at(0, 100.0)).unwrap();
        let event = series.append(candle_at(4, 104.0)).unwrap().unwrap();
        assert_eq!(event.kind, GapKind::Missing { intervals: 3 });
        assert_eq!(series.len(), 2);
        assert_eq!(series.gaps().len(), 1);
    }

    #[test]
    fn malformed_candle_is_rejected() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::H1);
        let mut bad = candle_at(0, 100.0);
        bad.high = 50.0;
        assert!(series.append(bad).is_err());
        assert!(series.is_empty());
    }

    #[test]
    fn monthly_series_tolerates_long_months() {
        let jan = Candle {
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ..candle_at(0, 100.0)
        };
        let feb = Candle {
            open_time: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            ..candle_at(0, 100.0)
        };
        assert_eq!(check_continuity(Some(&jan), &feb, Timeframe::Mo1), None);
    }

    #[test]
    fn range_and_tail() {
        let mut series = CandleSeries::new("ETHUSDT", Timeframe::H1);
        for h in 0..10 {
            series.append(candle_at(h, 100.0 + h as f64)).unwrap();
        }
        assert_eq!(series.tail(3).len(), 3);
        assert_eq!(series.tail(30).len(), 10);
        let window = series.range(candle_at(2, 0.0).open_time, candle_at(5, 0.0).open_time);
        assert_eq!(window.len(), 4);
        assert!((window[0].close - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn store_append_newer_skips_known_candles() {
        let mut store = MarketDataStore::new();
        let first: Vec<Candle> = (0..5).map(|h| candle_at(h, 100.0)).collect();
        assert_eq!(store.append_newer("BTCUSDT", Timeframe::H1, first), 5);

        let overlapping: Vec<Candle> = (3..8).map(|h| candle_at(h, 100.0)).collect();
        assert_eq!(
            store.append_newer("BTCUSDT", Timeframe::H1, overlapping),
            3
        );
        assert_eq!(store.candles("BTCUSDT", Timeframe::H1).len(), 8);
        assert!(store.candles("BTCUSDT", Timeframe::H4).is_empty());
    }

    #[test]
    fn store_append_newer_skips_malformed_candle() {
        let mut store = MarketDataStore::new();
        let mut batch: Vec<Candle> = (0..6).map(|h| candle_at(h, 100.0)).collect();
        batch[3].high = 50.0;
        assert_eq!(store.append_newer("BTCUSDT", Timeframe::H1, batch), 5);

        let stored = store.candles("BTCUSDT", Timeframe::H1);
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[3].open_time, candle_at(4, 0.0).open_time);
        assert_eq!(store.series("BTCUSDT", Timeframe::H1).unwrap().gaps().len(), 1);
    }

    #[test]
    fn retain_last_bounds_series_and_drops_old_gaps() {
        let mut store = MarketDataStore::new();
        let mut batch: Vec<Candle> = (0..3).map(|h| candle_at(h, 100.0)).collect();
        batch.extend((10..20).map(|h| candle_at(h, 100.0)));
        assert_eq!(store.append_newer("BTCUSDT", Timeframe::H1, batch), 13);
        assert_eq!(store.series("BTCUSDT", Timeframe::H1).unwrap().gaps().len(), 1);

        assert_eq!(store.retain_last("BTCUSDT", Timeframe::H1, 5), 8);
        let series = store.series("BTCUSDT", Timeframe::H1).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.candles()[0].open_time, candle_at(15, 0.0).open_time);
        assert!(series.gaps().is_empty());
        assert_eq!(store.retain_last("BTCUSDT", Timeframe::H1, 5), 0);
        assert_eq!(store.retain_last("ETHUSDT", Timeframe::H1, 5), 0);
    }

    #[test]
    fn store_symbols_are_sorted_and_unique() {
        let mut store = MarketDataStore::new();
        store.append("ETHUSDT", Timeframe::H1, candle_at(0, 10.0)).unwrap();
        store.append("BTCUSDT", Timeframe::H1, candle_at(0, 10.0)).unwrap();
        store.append("BTCUSDT", Timeframe::D1, candle_at(0, 10.0)).unwrap();
        assert_eq!(store.symbols(), vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(store.last_close("BTCUSDT", Timeframe::D1), Some(10.0));
    }
}
