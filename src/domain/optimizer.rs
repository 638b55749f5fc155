//! Grid search over strategy parameters.
//!
//! Each grid point is an independent backtest over the same read-only
//! candles, so points run in parallel on the rayon pool. Rows come back in a
//! fixed order regardless of scheduling.

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

use super::backtest::{run_backtest, BacktestConfig};
use super::candle::{Candle, Timeframe};
use super::error::TradedeskError;
use super::strategy::StrategyParams;

/// Inclusive `start..=end` walked by `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl ParameterRange {
    pub fn values(&self, name: &str) -> Result<Vec<f64>, TradedeskError> {
        if !self.start.is_finite() || !self.end.is_finite() || !self.step.is_finite() {
            return Err(TradedeskError::invalid_range(name, "bounds must be finite"));
        }
        if self.step <= 0.0 {
            return Err(TradedeskError::invalid_range(
                name,
                format!("step must be positive, got {}", self.step),
            ));
        }
        if self.start > self.end {
            return Err(TradedeskError::invalid_range(
                name,
                format!("start {} is after end {}", self.start, self.end),
            ));
        }

        // Integer stepping avoids accumulating float error over long ranges.
        let count = ((self.end - self.start) / self.step + 1e-9).floor() as usize + 1;
        Ok((0..count)
            .map(|i| self.start + i as f64 * self.step)
            .collect())
    }
}

/// Parse `"start:end:step"`, a comma list, or a single value.
pub fn parse_values(name: &str, text: &str) -> Result<Vec<f64>, TradedeskError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TradedeskError::invalid_range(name, "no values given"));
    }

    let number = |s: &str| -> Result<f64, TradedeskError> {
        s.trim()
            .parse::<f64>()
            .map_err(|_| TradedeskError::invalid_range(name, format!("not a number: {s:?}")))
    };

    if text.contains(':') {
        let parts: Vec<&str> = text.split(':').collect();
        let &[start, end, step] = parts.as_slice() else {
            return Err(TradedeskError::invalid_range(
                name,
                format!("expected start:end:step, got {text:?}"),
            ));
        };
        return ParameterRange {
            start: number(start)?,
            end: number(end)?,
            step: number(step)?,
        }
        .values(name);
    }

    text.split(',').map(number).collect()
}

fn as_periods(name: &str, values: &[f64]) -> Result<Vec<usize>, TradedeskError> {
    values
        .iter()
        .map(|v| {
            if *v < 1.0 || v.fract() != 0.0 {
                Err(TradedeskError::invalid_range(
                    name,
                    format!("periods must be whole numbers >= 1, got {v}"),
                ))
            } else {
                Ok(*v as usize)
            }
        })
        .collect()
}

/// Parse a period dimension (whole numbers only).
pub fn parse_periods(name: &str, text: &str) -> Result<Vec<usize>, TradedeskError> {
    as_periods(name, &parse_values(name, text)?)
}

/// Values to try for each tunable; every dimension must be non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGrid {
    pub rsi_period: Vec<usize>,
    pub macd_fast: Vec<usize>,
    pub macd_slow: Vec<usize>,
    pub macd_signal: Vec<usize>,
    pub bollinger_period: Vec<usize>,
    pub bollinger_width: Vec<f64>,
    pub risk_reward: Vec<f64>,
}

impl ParameterGrid {
    /// A one-point grid holding `base`'s values.
    pub fn from_params(base: &StrategyParams) -> Self {
        ParameterGrid {
            rsi_period: vec![base.indicators.rsi_period],
            macd_fast: vec![base.indicators.macd_fast],
            macd_slow: vec![base.indicators.macd_slow],
            macd_signal: vec![base.indicators.macd_signal],
            bollinger_period: vec![base.indicators.bollinger_period],
            bollinger_width: vec![base.indicators.bollinger_width],
            risk_reward: vec![base.risk.risk_reward],
        }
    }

    fn dimensions(&self) -> [(&'static str, usize); 7] {
        [
            ("rsi_period", self.rsi_period.len()),
            ("macd_fast", self.macd_fast.len()),
            ("macd_slow", self.macd_slow.len()),
            ("macd_signal", self.macd_signal.len()),
            ("bollinger_period", self.bollinger_period.len()),
            ("bollinger_width", self.bollinger_width.len()),
            ("risk_reward", self.risk_reward.len()),
        ]
    }

    /// Number of points before the MACD ordering filter.
    pub fn len(&self) -> usize {
        self.dimensions().iter().map(|(_, n)| n).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into parameter sets, dropping points with `macd_fast >= macd_slow`.
    ///
    /// Returns the points and how many were dropped.
    pub fn points(&self) -> Result<(Vec<ParameterSet>, usize), TradedeskError> {
        for (name, len) in self.dimensions() {
            if len == 0 {
                return Err(TradedeskError::invalid_range(name, "dimension has no values"));
            }
        }

        let mut points = Vec::with_capacity(self.len());
        let mut skipped = 0;
        for &rsi_period in &self.rsi_period {
            for &macd_fast in &self.macd_fast {
                for &macd_slow in &self.macd_slow {
                    for &macd_signal in &self.macd_signal {
                        for &bollinger_period in &self.bollinger_period {
                            for &bollinger_width in &self.bollinger_width {
                                for &risk_reward in &self.risk_reward {
                                    if macd_fast >= macd_slow {
                                        skipped += 1;
                                        continue;
                                    }
                                    points.push(ParameterSet {
                                        rsi_period,
                                        macd_fast,
                                        macd_slow,
                                        macd_signal,
                                        bollinger_period,
                                        bollinger_width,
                                        risk_reward,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        if points.is_empty() {
            return Err(TradedeskError::invalid_range(
                "macd_fast",
                "every grid point has macd_fast >= macd_slow",
            ));
        }
        Ok((points, skipped))
    }
}

/// The tuned values of one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSet {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_width: f64,
    pub risk_reward: f64,
}

impl ParameterSet {
    pub fn apply(&self, base: &StrategyParams) -> StrategyParams {
        let mut params = base.clone();
        params.indicators.rsi_period = self.rsi_period;
        params.indicators.macd_fast = self.macd_fast;
        params.indicators.macd_slow = self.macd_slow;
        params.indicators.macd_signal = self.macd_signal;
        params.indicators.bollinger_period = self.bollinger_period;
        params.indicators.bollinger_width = self.bollinger_width;
        params.risk.risk_reward = self.risk_reward;
        params
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.rsi_period
            .cmp(&other.rsi_period)
            .then(self.macd_fast.cmp(&other.macd_fast))
            .then(self.macd_slow.cmp(&other.macd_slow))
            .then(self.macd_signal.cmp(&other.macd_signal))
            .then(self.bollinger_period.cmp(&other.bollinger_period))
            .then(self.bollinger_width.total_cmp(&other.bollinger_width))
            .then(self.risk_reward.total_cmp(&other.risk_reward))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub parameters: ParameterSet,
    pub sharpe_ratio: f64,
    pub total_return_percent: f64,
    pub max_drawdown_percent: f64,
    pub win_rate: f64,
    pub trade_count: usize,
}

/// Best first: higher Sharpe, then higher return, lower drawdown, fewer
/// trades. Remaining ties fall back to parameter order.
fn rank(a: &OptimizationResult, b: &OptimizationResult) -> Ordering {
    b.sharpe_ratio
        .total_cmp(&a.sharpe_ratio)
        .then(b.total_return_percent.total_cmp(&a.total_return_percent))
        .then(a.max_drawdown_percent.total_cmp(&b.max_drawdown_percent))
        .then(a.trade_count.cmp(&b.trade_count))
        .then(a.parameters.cmp_key(&b.parameters))
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    /// Ranked best first.
    pub rows: Vec<OptimizationResult>,
    /// Index of the best row; `None` only when every point failed.
    pub best_index: Option<usize>,
    /// Grid points dropped for `macd_fast >= macd_slow`.
    pub skipped: usize,
    /// Grid points whose backtest returned an error.
    pub failed: usize,
}

impl OptimizationReport {
    pub fn best(&self) -> Option<&OptimizationResult> {
        self.best_index.and_then(|i| self.rows.get(i))
    }
}

/// Backtest every grid point over `candles` on the current rayon pool.
pub fn run_optimization(
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
    base: &StrategyParams,
    grid: &ParameterGrid,
    config: &BacktestConfig,
) -> Result<OptimizationReport, TradedeskError> {
    let (points, skipped) = grid.points()?;
    log::info!(
        "optimizing {symbol} {timeframe}: {} grid points ({skipped} skipped) on {} threads",
        points.len(),
        rayon::current_num_threads()
    );

    let outcomes: Vec<Result<OptimizationResult, (ParameterSet, TradedeskError)>> = points
        .par_iter()
        .map(|point| {
            let params = point.apply(base);
            run_backtest(symbol, timeframe, candles, &params, config)
                .map(|result| OptimizationResult {
                    parameters: *point,
                    sharpe_ratio: result.metrics.sharpe_ratio,
                    total_return_percent: result.metrics.total_return_percent,
                    max_drawdown_percent: result.metrics.max_drawdown_percent,
                    win_rate: result.metrics.win_rate,
                    trade_count: result.metrics.trade_count,
                })
                .map_err(|e| (*point, e))
        })
        .collect();

    let mut rows = Vec::with_capacity(outcomes.len());
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(row) => rows.push(row),
            Err((point, e)) => {
                log::warn!("grid point {point:?} failed: {e}");
                failed += 1;
            }
        }
    }

    rows.sort_by(rank);
    let best_index = if rows.is_empty() { None } else { Some(0) };

    Ok(OptimizationReport {
        rows,
        best_index,
        skipped,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::candles_from_closes;

    fn closes(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.25).sin() * 12.0 + (i as f64 * 0.05).cos() * 5.0)
            .collect()
    }

    fn small_grid() -> ParameterGrid {
        ParameterGrid {
            rsi_period: vec![7, 14],
            macd_fast: vec![8, 12],
            macd_slow: vec![12, 26],
            macd_signal: vec![9],
            bollinger_period: vec![20],
            bollinger_width: vec![2.0],
            risk_reward: vec![1.5, 2.0],
        }
    }

    #[test]
    fn range_syntax_expands_inclusive() {
        assert_eq!(parse_values("x", "10:20:5").unwrap(), vec![10.0, 15.0, 20.0]);
        assert_eq!(parse_values("x", "1.5, 2.0").unwrap(), vec![1.5, 2.0]);
        assert_eq!(parse_values("x", "3").unwrap(), vec![3.0]);
        assert_eq!(parse_periods("x", "10:14:2").unwrap(), vec![10, 12, 14]);
    }

    #[test]
    fn fractional_step_does_not_drop_the_end() {
        let values = parse_values("x", "1.0:2.0:0.1").unwrap();
        assert_eq!(values.len(), 11);
        assert!((values[10] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bad_ranges_rejected() {
        for text in ["20:10:1", "10:20:0", "10:20:-1", "10:20", "", "a,b"] {
            let err = parse_values("rsi_period", text).unwrap_err();
            assert!(
                matches!(err, TradedeskError::InvalidParameterRange { .. }),
                "{text:?} gave {err}"
            );
        }
        assert!(parse_periods("rsi_period", "2.5").is_err());
        assert!(parse_periods("rsi_period", "0").is_err());
    }

    #[test]
    fn empty_dimension_rejected() {
        let grid = ParameterGrid {
            risk_reward: vec![],
            ..small_grid()
        };
        assert!(matches!(
            grid.points().unwrap_err(),
            TradedeskError::InvalidParameterRange { ref name, .. } if name == "risk_reward"
        ));
    }

    #[test]
    fn fast_not_below_slow_is_skipped() {
        let (points, skipped) = small_grid().points().unwrap();
        // fast 12 / slow 12 is dropped: 2 rsi × 1 × 2 rr
        assert_eq!(skipped, 4);
        assert_eq!(points.len(), small_grid().len() - 4);
        assert!(points.iter().all(|p| p.macd_fast < p.macd_slow));
    }

    #[test]
    fn all_points_skipped_is_an_error() {
        let grid = ParameterGrid {
            macd_fast: vec![26],
            macd_slow: vec![12],
            ..small_grid()
        };
        assert!(grid.points().is_err());
    }

    #[test]
    fn best_row_dominates_all_rows() {
        let candles = candles_from_closes(&closes(250));
        let report = run_optimization(
            "BTCUSDT",
            Timeframe::H1,
            &candles,
            &StrategyParams::default(),
            &small_grid(),
            &BacktestConfig::default(),
        )
        .unwrap();

        assert_eq!(report.rows.len(), 12);
        assert_eq!(report.failed, 0);
        let best = report.best().unwrap();
        assert!(report.rows.iter().all(|r| best.sharpe_ratio >= r.sharpe_ratio));
    }

    #[test]
    fn rows_are_order_stable() {
        let candles = candles_from_closes(&closes(200));
        let run = || {
            run_optimization(
                "BTCUSDT",
                Timeframe::H1,
                &candles,
                &StrategyParams::default(),
                &small_grid(),
                &BacktestConfig::default(),
            )
            .unwrap()
            .rows
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn failing_points_are_counted() {
        let grid = ParameterGrid {
            bollinger_width: vec![0.0, 2.0],
            ..small_grid()
        };
        let report = run_optimization(
            "BTCUSDT",
            Timeframe::H1,
            &candles_from_closes(&closes(120)),
            &StrategyParams::default(),
            &grid,
            &BacktestConfig::default(),
        )
        .unwrap();
        assert_eq!(report.failed, 12);
        assert_eq!(report.rows.len(), 12);
    }

    #[test]
    fn ranking_breaks_sharpe_ties_by_return() {
        let params = ParameterSet {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_width: 2.0,
            risk_reward: 2.0,
        };
        let row = |ret: f64, dd: f64| OptimizationResult {
            parameters: params,
            sharpe_ratio: 1.0,
            total_return_percent: ret,
            max_drawdown_percent: dd,
            win_rate: 0.5,
            trade_count: 3,
        };
        let mut rows = vec![row(5.0, 2.0), row(8.0, 9.0), row(8.0, 1.0)];
        rows.sort_by(rank);
        assert_eq!(rows[0], row(8.0, 1.0));
        assert_eq!(rows[1], row(8.0, 9.0));
        assert_eq!(rows[2], row(5.0, 2.0));
    }
}
