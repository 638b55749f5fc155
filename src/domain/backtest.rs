//! Single-symbol backtest loop.
//!
//! Candles are replayed strictly in order. At step i the engine sees candle i
//! and nothing after it: exits are checked against the bar's range first, the
//! indicator state advances by one candle, and only then is a signal
//! generated and acted on at the bar's close.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use super::candle::{Candle, Timeframe};
use super::error::{GapKind, TradedeskError};
use super::indicator::IndicatorEngine;
use super::market_data::{check_continuity, DataGapEvent};
use super::metrics::Metrics;
use super::portfolio::EquityPoint;
use super::position::{CloseReason, Direction, Trade};
use super::position_manager::{ExecutionCosts, ExitScope, PositionManager};
use super::signal::{generate_signal, recent_volatility_percent, Signal, SignalInputs};
use super::strategy::StrategyParams;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Percent of notional charged on every fill.
    pub commission_pct: f64,
    /// Percent adverse price movement applied to every fill.
    pub slippage_pct: f64,
    pub allow_shorting: bool,
    /// Annual rate used by the Sharpe and Sortino ratios.
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            commission_pct: 0.1,
            slippage_pct: 0.0,
            allow_shorting: true,
            risk_free_rate: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn costs(&self) -> ExecutionCosts {
        ExecutionCosts {
            commission_pct: self.commission_pct,
            slippage_pct: self.slippage_pct,
        }
    }

    pub fn validate(&self) -> Result<(), TradedeskError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(TradedeskError::config_invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if !(0.0..100.0).contains(&self.commission_pct) {
            return Err(TradedeskError::config_invalid(
                "backtest",
                "commission_pct",
                "commission_pct must be in [0, 100)",
            ));
        }
        if !(0.0..100.0).contains(&self.slippage_pct) {
            return Err(TradedeskError::config_invalid(
                "backtest",
                "slippage_pct",
                "slippage_pct must be in [0, 100)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub initial_capital: f64,
    pub trades: Vec<Trade>,
    /// One point per accepted candle.
    pub equity_curve: Vec<EquityPoint>,
    pub gaps: Vec<DataGapEvent>,
    pub signals_evaluated: usize,
    pub positions_opened: usize,
    pub metrics: Metrics,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_capital)
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.equity_curve.first().map(|p| p.time)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.equity_curve.last().map(|p| p.time)
    }
}

/// Replay `candles` for one symbol and return the trade ledger, equity curve
/// and metrics.
///
/// Malformed or out-of-order candles are skipped and recorded as gaps. A
/// candle that follows missing intervals is used for exits and indicator
/// state, but no signal is taken on it.
pub fn run_backtest(
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
    params: &StrategyParams,
    config: &BacktestConfig,
) -> Result<BacktestResult, TradedeskError> {
    params.validate()?;
    config.validate()?;

    let mut manager = PositionManager::new(config.initial_capital, config.costs());
    let mut engine = IndicatorEngine::new(params.indicators);
    let lookback = params.signal.volatility_lookback + 1;
    let mut closes: VecDeque<f64> = VecDeque::with_capacity(lookback + 1);
    let mut prices: HashMap<String, f64> = HashMap::new();

    let mut equity_curve = Vec::with_capacity(candles.len());
    let mut gaps = Vec::new();
    let mut signals_evaluated = 0;
    let mut positions_opened = 0;
    let mut previous: Option<&Candle> = None;

    for candle in candles {
        let take_signal = match check_continuity(previous, candle, timeframe) {
            Some(kind @ (GapKind::OutOfOrder | GapKind::InvalidPrices)) => {
                log::warn!("{symbol}: skipping candle at {} ({kind})", candle.open_time);
                gaps.push(DataGapEvent {
                    at: candle.open_time,
                    kind,
                });
                continue;
            }
            Some(kind @ GapKind::Missing { .. }) => {
                log::warn!(
                    "{symbol}: {kind} before {}, no signal this step",
                    candle.open_time
                );
                gaps.push(DataGapEvent {
                    at: candle.open_time,
                    kind,
                });
                false
            }
            None => true,
        };

        manager.evaluate_exits(ExitScope::All, symbol, candle)?;

        let set = engine.update(candle);
        closes.push_back(candle.close);
        if closes.len() > lookback {
            closes.pop_front();
        }
        prices.insert(symbol.to_string(), candle.close);

        if take_signal {
            let frames = [(timeframe, set)];
            let inputs = SignalInputs {
                symbol,
                primary_timeframe: timeframe,
                frames: &frames,
                last_close: candle.close,
                recent_volatility_percent: recent_volatility_percent(closes.make_contiguous()),
                equity: manager.equity(&prices),
                advisory: None,
                now: candle.open_time,
            };
            let signal = generate_signal(&inputs, &params.signal, &params.risk);
            signals_evaluated += 1;
            if act_on_signal(&mut manager, symbol, candle, &signal, params, config)? {
                positions_opened += 1;
            }
        }

        equity_curve.push(EquityPoint {
            time: candle.open_time,
            equity: manager.equity(&prices),
        });
        previous = Some(candle);
    }

    if let Some(last) = previous {
        let open_ids: Vec<u64> = manager.open_positions().map(|p| p.id).collect();
        for id in open_ids {
            manager.close(id, CloseReason::EndOfData, last.close, last.open_time)?;
        }
        if let Some(point) = equity_curve.last_mut() {
            point.equity = manager.equity(&prices);
        }
    }

    let trades = manager.trades().to_vec();
    let metrics = Metrics::compute(
        &equity_curve,
        &trades,
        config.initial_capital,
        timeframe,
        config.risk_free_rate,
    );
    log::info!(
        "{symbol} {timeframe}: {} candles, {} signals, {} trades, return {:.2}%",
        equity_curve.len(),
        signals_evaluated,
        trades.len(),
        metrics.total_return_percent
    );

    Ok(BacktestResult {
        symbol: symbol.to_string(),
        timeframe,
        initial_capital: config.initial_capital,
        trades,
        equity_curve,
        gaps,
        signals_evaluated,
        positions_opened,
        metrics,
    })
}

/// Apply a signal at the candle's close. Returns true when a position opened.
fn act_on_signal(
    manager: &mut PositionManager,
    symbol: &str,
    candle: &Candle,
    signal: &Signal,
    params: &StrategyParams,
    config: &BacktestConfig,
) -> Result<bool, TradedeskError> {
    let Some(direction) = signal.action.direction() else {
        return Ok(false);
    };

    let held: Vec<(u64, Direction)> = manager
        .open_for_symbol(symbol)
        .map(|p| (p.id, p.direction))
        .collect();
    if held.iter().any(|(_, d)| *d == direction) {
        return Ok(false);
    }
    if !held.is_empty() {
        if !params.reversal {
            return Ok(false);
        }
        for (id, _) in held {
            manager.close(id, CloseReason::SignalReversal, candle.close, candle.open_time)?;
        }
    }

    if direction == Direction::Short && !config.allow_shorting {
        return Ok(false);
    }
    if signal.position_size <= 0.0 {
        return Ok(false);
    }

    match manager.open(
        symbol,
        direction,
        signal.position_size,
        signal.entry_price,
        signal.stop_loss,
        signal.take_profit,
        candle.open_time,
    ) {
        Ok(_) => Ok(true),
        Err(e @ (TradedeskError::InsufficientCapital { .. } | TradedeskError::InvalidOrder { .. })) => {
            log::debug!("{symbol}: {} signal at {} not taken: {e}", signal.action, candle.open_time);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
