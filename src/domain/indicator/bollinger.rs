//! Bollinger Bands and band position.
//!
//! - Middle: SMA over n closes
//! - Upper/Lower: middle ± (multiplier × population stddev)
//!
//! Position = (close - lower) / (upper - lower) × 100. A zero-width band
//! reports 50. The first (period-1) values are undefined.

use std::collections::VecDeque;

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Unclamped location of `close` between the bands, in percent.
    pub fn position_percent(&self, close: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= f64::EPSILON * self.middle.abs().max(1.0) {
            return 50.0;
        }
        (close - self.lower) / width * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    mult: f64,
    window: VecDeque<f64>,
}

impl Bollinger {
    pub fn new(period: usize, mult: f64) -> Self {
        Bollinger {
            period,
            mult,
            window: VecDeque::with_capacity(period),
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BollingerBands> {
        if self.period == 0 {
            return None;
        }
        if self.window.len() == self.period {
            self.window.pop_front();
        }
        self.window.push_back(close);
        if self.window.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let middle = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|c| {
                let diff = c - middle;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let stddev = variance.sqrt();

        Some(BollingerBands {
            upper: middle + self.mult * stddev,
            middle,
            lower: middle - self.mult * stddev,
        })
    }
}

pub fn calculate_bollinger(
    candles: &[Candle],
    period: usize,
    stddev_mult_x100: u32,
) -> IndicatorSeries {
    let mut bollinger = Bollinger::new(period, stddev_mult_x100 as f64 / 100.0);
    let values = candles
        .iter()
        .map(|c| {
            let bands = bollinger.update(c.close);
            let b = bands.unwrap_or(BollingerBands {
                upper: 0.0,
                middle: 0.0,
                lower: 0.0,
            });
            IndicatorPoint {
                date: c.open_time,
                valid: bands.is_some(),
                value: IndicatorValue::Bollinger {
                    upper: b.upper,
                    middle: b.middle,
                    lower: b.lower,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        values,
    }
}
