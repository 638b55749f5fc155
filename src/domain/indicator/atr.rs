//! Average True Range with Wilder smoothing.
//!
//! TR needs the previous close, so the first candle only primes state. The
//! first ATR is the mean of n true ranges; after that
//! ATR = (prev * (n-1) + TR) / n.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    ranges: usize,
    value: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Atr {
            period,
            prev_close: None,
            ranges: 0,
            value: 0.0,
        }
    }

    pub fn update(&mut self, candle: &Candle) -> Option<f64> {
        let prev = self.prev_close.replace(candle.close)?;
        if self.period == 0 {
            return None;
        }

        let tr = candle.true_range(prev);
        let n = self.period as f64;
        self.ranges += 1;
        if self.ranges < self.period {
            self.value += tr;
            return None;
        }
        if self.ranges == self.period {
            self.value = (self.value + tr) / n;
        } else {
            self.value = (self.value * (n - 1.0) + tr) / n;
        }
        Some(self.value)
    }
}

pub fn calculate_atr(candles: &[Candle], period: usize) -> IndicatorSeries {
    let mut atr = Atr::new(period);
    let values = candles
        .iter()
        .map(|c| {
            let v = atr.update(c);
            IndicatorPoint {
                date: c.open_time,
                valid: v.is_some(),
                value: IndicatorValue::Simple(v.unwrap_or(0.0)),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values,
    }
}
