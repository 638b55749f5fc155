//! Performance metrics over an equity curve and trade ledger.
//!
//! Returns and ratios are annualised with the candle timeframe's periods per
//! year (365-day calendar), not a fixed 252 trading days.

use serde::Serialize;

use super::candle::Timeframe;
use super::portfolio::EquityPoint;
use super::position::Trade;

/// Below this per-period standard deviation a curve is treated as flat.
const FLAT_STDDEV: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return_percent: f64,
    pub annualized_return_percent: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_percent: f64,
    /// Longest run of candles spent below a previous peak.
    pub max_drawdown_duration: usize,
    pub trade_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    /// Fraction of trades with positive net pnl, in [0, 1].
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// avg_win / avg_loss; 0 when there are no losing trades.
    pub avg_win_loss_ratio: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Mean holding period in hours.
    pub avg_holding_hours: f64,
}

impl Metrics {
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        timeframe: Timeframe,
        risk_free_rate: f64,
    ) -> Self {
        let periods_per_year = timeframe.periods_per_year();
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let years = equity_curve.len() as f64 / periods_per_year;
        let annualized_return = if years <= 0.0 || !total_return.is_finite() {
            0.0
        } else if total_return <= -1.0 {
            -1.0
        } else {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let period_rf = risk_free_rate / periods_per_year;
        let (sharpe_ratio, sortino_ratio) =
            compute_risk_adjusted(equity_curve, period_rf, periods_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_hours = 0.0_f64;

        for trade in trades {
            let pnl = trade.realized_pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_hours += trade.holding_period().num_minutes() as f64 / 60.0;
        }

        let trade_count = trades.len();
        let win_rate = if trade_count > 0 {
            trades_won as f64 / trade_count as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };
        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };
        let avg_win_loss_ratio = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

        let avg_holding_hours = if trade_count > 0 {
            total_hours / trade_count as f64
        } else {
            0.0
        };

        Metrics {
            total_return_percent: total_return * 100.0,
            annualized_return_percent: annualized_return * 100.0,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown_percent: max_drawdown * 100.0,
            max_drawdown_duration,
            trade_count,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            avg_win_loss_ratio,
            largest_win,
            largest_loss,
            avg_holding_hours,
        }
    }
}

/// Largest peak-to-trough decline as a fraction, and the longest run of
/// points spent below a peak.
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            duration += 1;
            max_duration = max_duration.max(duration);
        }
    }

    (max_dd, max_duration)
}

fn compute_risk_adjusted(
    equity_curve: &[EquityPoint],
    period_rf: f64,
    periods_per_year: f64,
) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess = mean - period_rf;
    let annualiser = periods_per_year.sqrt();

    let sharpe = if stddev > FLAT_STDDEV {
        excess / stddev * annualiser
    } else {
        0.0
    };

    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < period_rf)
        .map(|&r| (r - period_rf).powi(2))
        .sum();
    let downside_stddev = (downside_sq / n).sqrt();
    let sortino = if downside_stddev > FLAT_STDDEV {
        excess / downside_stddev * annualiser
    } else {
        0.0
    };

    (sharpe, sortino)
}
