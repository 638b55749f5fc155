//! MACD (Moving Average Convergence Divergence).
//!
//! MACD line = EMA(fast) - EMA(slow)
//! Signal line = EMA(signal) of the MACD line
//! Histogram = MACD line - signal line
//!
//! Defaults 12/26/9. A value is reported once max(fast, slow) + signal
//! closes have been seen.

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    Ema, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, MacdValue,
};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    warmup: usize,
    count: usize,
    disabled: bool,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Macd {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            warmup: fast.max(slow) + signal,
            count: 0,
            disabled: fast == 0 || slow == 0 || signal == 0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        if self.disabled {
            return None;
        }
        self.count += 1;

        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (fast, slow) = (fast?, slow?);

        let line = fast - slow;
        let signal = self.signal.update(line)?;
        if self.count < self.warmup {
            return None;
        }
        Some(MacdValue {
            value: line,
            signal,
            histogram: line - signal,
        })
    }
}

pub fn calculate_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let mut macd = Macd::new(fast, slow, signal_period);
    let values = candles
        .iter()
        .map(|c| {
            let v = macd.update(c.close);
            IndicatorPoint {
                date: c.open_time,
                valid: v.is_some(),
                value: match v {
                    Some(m) => IndicatorValue::Macd {
                        line: m.value,
                        signal: m.signal,
                        histogram: m.histogram,
                    },
                    None => IndicatorValue::Macd {
                        line: 0.0,
                        signal: 0.0,
                        histogram: 0.0,
                    },
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(candles: &[Candle]) -> IndicatorSeries {
    calculate_macd(candles, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}
