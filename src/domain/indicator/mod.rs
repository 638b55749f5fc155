//! Technical indicators.
//!
//! Each submodule exposes an incremental calculator (`update` one close or
//! candle at a time, state carried forward) and a batch `calculate_*`
//! function that replays a candle slice through that calculator into an
//! `IndicatorSeries`. `IndicatorEngine` bundles the calculators the signal
//! pipeline needs and yields one `IndicatorSet` per candle.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;

pub use atr::{Atr, calculate_atr};
pub use bollinger::{Bollinger, BollingerBands, calculate_bollinger};
pub use ema::{Ema, calculate_ema};
pub use macd::{Macd, calculate_macd};
pub use rsi::{Rsi, calculate_rsi};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::candle::Candle;
use super::error::TradedeskError;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub date: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// The most recent valid point, if any.
    pub fn last_valid(&self) -> Option<&IndicatorPoint> {
        self.values.iter().rev().find(|p| p.valid)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// MACD line, its signal EMA and the histogram between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Indicator readings for one timeframe at one candle.
///
/// A member is `None` until its warm-up window has been met.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    /// Close position between the bands, clamped to [0, 100].
    pub bollinger_position_percent: Option<f64>,
    /// Unclamped position; below 0 or above 100 when the close is outside the bands.
    pub bollinger_position_raw: Option<f64>,
    pub atr: Option<f64>,
}

impl IndicatorSet {
    /// True when no directional indicator (RSI, MACD, Bollinger) is defined.
    pub fn is_empty(&self) -> bool {
        self.rsi.is_none() && self.macd.is_none() && self.bollinger_position_raw.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_width: f64,
    pub atr_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_width: 2.0,
            atr_period: 14,
        }
    }
}

impl IndicatorConfig {
    pub fn rsi_warmup(&self) -> usize {
        self.rsi_period + 1
    }

    pub fn macd_warmup(&self) -> usize {
        self.macd_fast.max(self.macd_slow) + self.macd_signal
    }

    pub fn bollinger_warmup(&self) -> usize {
        self.bollinger_period
    }

    pub fn atr_warmup(&self) -> usize {
        self.atr_period + 1
    }

    /// Candles needed before every indicator is defined.
    pub fn warmup(&self) -> usize {
        self.rsi_warmup()
            .max(self.macd_warmup())
            .max(self.bollinger_warmup())
            .max(self.atr_warmup())
    }

    /// Candles needed before any directional indicator is defined.
    pub fn min_warmup(&self) -> usize {
        self.rsi_warmup()
            .min(self.macd_warmup())
            .min(self.bollinger_warmup())
    }

    pub fn bollinger_mult_x100(&self) -> u32 {
        (self.bollinger_width * 100.0).round() as u32
    }
}

/// Incremental, causal indicator state for one series.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    atr: Atr,
    seen: usize,
    current: IndicatorSet,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        IndicatorEngine {
            rsi: Rsi::new(config.rsi_period),
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bollinger: Bollinger::new(config.bollinger_period, config.bollinger_width),
            atr: Atr::new(config.atr_period),
            config,
            seen: 0,
            current: IndicatorSet::default(),
        }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Number of candles consumed so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Feed the next candle and return the readings as of that candle.
    pub fn update(&mut self, candle: &Candle) -> IndicatorSet {
        self.seen += 1;
        let close = candle.close;

        let rsi = self.rsi.update(close);
        let macd = self.macd.update(close);
        let bands = self.bollinger.update(close);
        let atr = self.atr.update(candle);

        let raw = bands.map(|b| b.position_percent(close));
        self.current = IndicatorSet {
            rsi,
            macd,
            bollinger_position_percent: raw.map(|p| p.clamp(0.0, 100.0)),
            bollinger_position_raw: raw,
            atr,
        };
        self.current.clone()
    }

    pub fn current(&self) -> &IndicatorSet {
        &self.current
    }
}

/// Replay `candles` from scratch and return the readings at the last one.
///
/// Fails with `InsufficientHistory` when no directional indicator can be
/// defined yet; a partially warm set keeps its absent members `None`.
pub fn compute_indicator_set(
    candles: &[Candle],
    config: &IndicatorConfig,
) -> Result<IndicatorSet, TradedeskError> {
    let need = config.min_warmup();
    if candles.len() < need {
        return Err(TradedeskError::InsufficientHistory {
            have: candles.len(),
            need,
        });
    }

    let mut engine = IndicatorEngine::new(*config);
    for candle in candles {
        engine.update(candle);
    }
    Ok(engine.current().clone())
}
