#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tradedesk::domain::candle::{Candle, Timeframe};
use tradedesk::domain::error::TradedeskError;
use tradedesk::domain::signal::{AdvisoryRecord, Trend};
use tradedesk::ports::advisory_port::{AdvisoryPort, AdvisoryRequest};
use tradedesk::ports::config_port::ConfigPort;
use tradedesk::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<(String, Timeframe), Vec<Candle>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_candles(mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.data.insert((symbol.to_string(), timeframe), candles);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    fn check(&self, symbol: &str) -> Result<(), TradedeskError> {
        match self.errors.get(symbol) {
            Some(reason) => Err(TradedeskError::Data {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradedeskError> {
        self.check(symbol)?;
        Ok(self
            .data
            .get(&(symbol.to_string(), timeframe))
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.open_time >= start && c.open_time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, TradedeskError> {
        let mut symbols: Vec<String> = self
            .data
            .keys()
            .filter(|(_, tf)| *tf == timeframe)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradedeskError> {
        self.check(symbol)?;
        match self.data.get(&(symbol.to_string(), timeframe)) {
            Some(candles) if !candles.is_empty() => {
                let first = candles.iter().map(|c| c.open_time).min().unwrap();
                let last = candles.iter().map(|c| c.open_time).max().unwrap();
                Ok(Some((first, last, candles.len())))
            }
            _ => Ok(None),
        }
    }
}

/// In-memory `ConfigPort` keyed by `(section, key)`.
pub struct MockConfig {
    pub values: HashMap<(String, String), String>,
}

impl MockConfig {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            values: entries
                .iter()
                .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                .collect(),
        }
    }
}

impl ConfigPort for MockConfig {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_string(section, key).as_deref().map(str::trim) {
            Some("true") | Some("yes") | Some("1") => true,
            Some("false") | Some("no") | Some("0") => false,
            _ => default,
        }
    }
}

/// Advisory service that always answers with the same trend.
pub struct FixedAdvisory {
    pub trend: Trend,
    pub confidence: f64,
    pub calls: AtomicUsize,
}

impl FixedAdvisory {
    pub fn new(trend: Trend, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            trend,
            confidence,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AdvisoryPort for FixedAdvisory {
    fn analyze(&self, request: &AdvisoryRequest) -> Result<AdvisoryRecord, TradedeskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AdvisoryRecord {
            trend: self.trend,
            support_levels: vec![request.last_price * 0.95],
            resistance_levels: vec![request.last_price * 1.05],
            sentiment: self.trend.bias() * 0.5,
            confidence: self.confidence,
            volume_analysis: Some("steady".to_string()),
            reasoning: Some("fixed test advisory".to_string()),
        })
    }
}

/// Advisory service that is always down.
pub struct DownAdvisory;

impl AdvisoryPort for DownAdvisory {
    fn analyze(&self, _request: &AdvisoryRequest) -> Result<AdvisoryRecord, TradedeskError> {
        Err(TradedeskError::external("advisory", "connection refused"))
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// One candle per `timeframe` interval from `base_time()`, with a small
/// symmetric range around each close.
pub fn candles_from_closes(closes: &[f64], timeframe: Timeframe) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                open_time: base_time() + timeframe.duration() * i as i32,
                open,
                high: open.max(close) * 1.002,
                low: open.min(close) * 0.998,
                close,
                volume: 10.0,
                quote_volume: 10.0 * close,
            }
        })
        .collect()
}

pub fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| Candle {
            open_time: base_time() + Duration::hours(i as i64),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
            quote_volume: price,
        })
        .collect()
}

/// Hourly oscillating series with a slow drift, enough to produce trades.
pub fn wave_closes(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + 8.0 * (t / 9.0).sin() + 3.0 * (t / 3.7).cos() + t * 0.02
        })
        .collect()
}

pub fn hourly_wave(n: usize) -> Vec<Candle> {
    candles_from_closes(&wave_closes(n), Timeframe::H1)
}
