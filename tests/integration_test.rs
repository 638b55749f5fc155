//! Engine-level properties: no lookahead, deterministic replay, ledger
//! invariants, exit precedence and optimizer ranking.

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use tradedesk::domain::backtest::{run_backtest, BacktestConfig};
use tradedesk::domain::candle::{Candle, Timeframe};
use tradedesk::domain::error::TradedeskError;
use tradedesk::domain::indicator::{calculate_rsi, compute_indicator_set, IndicatorEngine, IndicatorConfig};
use tradedesk::domain::optimizer::{run_optimization, ParameterGrid};
use tradedesk::domain::portfolio::PortfolioSummary;
use tradedesk::domain::position::{CloseReason, Direction, LevelEdit};
use tradedesk::domain::position_manager::{ExecutionCosts, ExitScope, PositionManager};
use tradedesk::domain::strategy::StrategyParams;

fn zero_cost() -> BacktestConfig {
    BacktestConfig {
        commission_pct: 0.0,
        slippage_pct: 0.0,
        ..BacktestConfig::default()
    }
}

fn trading_params() -> StrategyParams {
    let mut params = StrategyParams::default();
    params.signal.buy_threshold = 0.2;
    params
}

mod no_lookahead {
    use super::*;

    #[test]
    fn indicators_ignore_future_tails() {
        let shared = wave_closes(80);
        let mut up = shared.clone();
        up.extend((0..40).map(|i| 150.0 + i as f64));
        let mut down = shared.clone();
        down.extend((0..40).map(|i| 60.0 - i as f64 * 0.5));

        let a = candles_from_closes(&up, Timeframe::H1);
        let b = candles_from_closes(&down, Timeframe::H1);
        let config = IndicatorConfig::default();
        let mut engine_a = IndicatorEngine::new(config);
        let mut engine_b = IndicatorEngine::new(config);
        for i in 0..shared.len() {
            assert_eq!(engine_a.update(&a[i]), engine_b.update(&b[i]), "index {i}");
        }
    }

    #[test]
    fn incremental_engine_matches_replay_from_scratch() {
        let candles = hourly_wave(90);
        let config = IndicatorConfig::default();
        let mut engine = IndicatorEngine::new(config);
        for (i, candle) in candles.iter().enumerate() {
            let incremental = engine.update(candle);
            if let Ok(replayed) = compute_indicator_set(&candles[..=i], &config) {
                assert_eq!(incremental, replayed, "index {i}");
            }
        }
    }

    #[test]
    fn backtest_prefix_unaffected_by_future() {
        let shared = wave_closes(200);
        let mut tail_a = shared.clone();
        tail_a.extend(vec![300.0; 50]);
        let mut tail_b = shared.clone();
        tail_b.extend(vec![20.0; 50]);

        let params = trading_params();
        let ra = run_backtest(
            "BTCUSDT",
            Timeframe::H1,
            &candles_from_closes(&tail_a, Timeframe::H1),
            &params,
            &zero_cost(),
        )
        .unwrap();
        let rb = run_backtest(
            "BTCUSDT",
            Timeframe::H1,
            &candles_from_closes(&tail_b, Timeframe::H1),
            &params,
            &zero_cost(),
        )
        .unwrap();

        // The last shared candle's equity can already reflect a fill on it,
        // so compare strictly before it.
        let n = shared.len() - 1;
        assert_eq!(ra.equity_curve[..n], rb.equity_curve[..n]);
        let cutoff = ra.equity_curve[n - 1].time;
        let early = |r: &tradedesk::domain::backtest::BacktestResult| {
            r.trades
                .iter()
                .filter(|t| t.closed_at <= cutoff)
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(early(&ra), early(&rb));
    }
}

mod deterministic_replay {
    use super::*;

    #[test]
    fn identical_inputs_identical_outputs() {
        let candles = hourly_wave(400);
        let params = trading_params();
        let config = BacktestConfig::default();
        let first = run_backtest("BTCUSDT", Timeframe::H1, &candles, &params, &config).unwrap();
        let second = run_backtest("BTCUSDT", Timeframe::H1, &candles, &params, &config).unwrap();
        assert_eq!(first.trades, second.trades);
        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.metrics, second.metrics);
    }

    #[test]
    fn oversold_slide_trades_and_closes_everything() {
        let mut closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64).collect();
        closes.extend(wave_closes(200).iter().map(|c| c + 20.0));
        let candles = candles_from_closes(&closes, Timeframe::H1);
        let result =
            run_backtest("BTCUSDT", Timeframe::H1, &candles, &trading_params(), &zero_cost()).unwrap();
        assert!(!result.trades.is_empty());
        assert_eq!(result.equity_curve.len(), candles.len());
        assert_eq!(result.positions_opened, result.trades.len());

        let realized: f64 = result.trades.iter().map(|t| t.realized_pnl).sum();
        assert_abs_diff_eq!(
            result.final_equity(),
            result.initial_capital + realized,
            epsilon = 1e-6
        );
    }
}

mod flat_series {
    use super::*;

    #[test]
    fn no_trades_and_zero_sharpe() {
        let candles = flat_candles(300, 100.0);
        let result = run_backtest(
            "BTCUSDT",
            Timeframe::H1,
            &candles,
            &StrategyParams::default(),
            &BacktestConfig::default(),
        )
        .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.max_drawdown_percent, 0.0);
        assert_eq!(result.final_equity(), result.initial_capital);
    }
}

mod rsi_scenario {
    use super::*;

    #[test]
    fn rising_series_converges_to_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let series = calculate_rsi(&candles_from_closes(&closes, Timeframe::H1), 14);
        let values: Vec<f64> = series
            .values
            .iter()
            .filter(|p| p.valid)
            .filter_map(|p| match p.value {
                tradedesk::domain::indicator::IndicatorValue::Simple(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values.len(), 20 - 14);
        for v in &values {
            assert!(*v <= 100.0);
        }
        assert_abs_diff_eq!(*values.last().unwrap(), 100.0, epsilon = 1e-9);
    }
}

mod position_ledger {
    use super::*;

    fn manager(commission_pct: f64) -> PositionManager {
        PositionManager::new(
            100_000.0,
            ExecutionCosts {
                commission_pct,
                slippage_pct: 0.0,
            },
        )
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: base_time(),
            open,
            high,
            low,
            close,
            volume: 1.0,
            quote_volume: close,
        }
    }

    #[test]
    fn stop_wins_when_both_levels_in_one_bar() {
        let mut pm = manager(0.0);
        let pos = pm
            .open("BTCUSDT", Direction::Long, 1.0, 100.0, Some(95.0), Some(110.0), base_time())
            .unwrap();
        let trades = pm
            .evaluate_exits(ExitScope::All, "BTCUSDT", &bar(100.0, 112.0, 90.0, 105.0))
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].position_id, pos.id);
        assert_eq!(trades[0].close_price, 95.0);
        assert_eq!(trades[0].close_reason, CloseReason::StopLoss);
        assert_eq!(pm.open_count(), 0);
    }

    #[test]
    fn zero_commission_round_trip_is_flat() {
        let mut pm = manager(0.0);
        let pos = pm
            .open("BTCUSDT", Direction::Short, 3.0, 250.0, None, None, base_time())
            .unwrap();
        let trade = pm
            .close(pos.id, CloseReason::Manual, 250.0, base_time())
            .unwrap();
        assert_eq!(trade.realized_pnl, 0.0);
        assert_eq!(trade.realized_pnl_percent, 0.0);
        assert_eq!(pm.cash(), 100_000.0);
    }

    #[test]
    fn commission_makes_round_trip_negative() {
        let mut pm = manager(0.1);
        let pos = pm
            .open("BTCUSDT", Direction::Long, 1.0, 1_000.0, None, None, base_time())
            .unwrap();
        let trade = pm
            .close(pos.id, CloseReason::Manual, 1_000.0, base_time())
            .unwrap();
        assert_abs_diff_eq!(trade.realized_pnl, -2.0, epsilon = 1e-9);
        assert!(trade.realized_pnl_percent < 0.0);
    }

    #[test]
    fn every_close_yields_one_trade_and_ids_stay_unique() {
        let mut pm = manager(0.05);
        let mut seen = HashSet::new();
        let mut closed = 0;
        for i in 0..30u32 {
            let price = 100.0 + f64::from(i);
            let pos = pm
                .open("BTCUSDT", Direction::Long, 1.0, price, Some(price - 5.0), None, base_time())
                .unwrap();
            assert!(seen.insert(pos.id), "id {} reused", pos.id);
            let ids: Vec<u64> = pm.open_positions().map(|p| p.id).collect();
            let unique: HashSet<u64> = ids.iter().copied().collect();
            assert_eq!(ids.len(), unique.len());

            if i % 3 == 0 {
                pm.close(pos.id, CloseReason::Manual, price, base_time()).unwrap();
                closed += 1;
                assert!(matches!(
                    pm.close(pos.id, CloseReason::Manual, price, base_time()),
                    Err(TradedeskError::PositionNotFound { .. })
                ));
            }
        }
        assert_eq!(pm.trades().len(), closed);
        assert_eq!(pm.open_count() + closed, 30);

        let crash = pm
            .evaluate_exits(ExitScope::All, "BTCUSDT", &bar(50.0, 50.0, 40.0, 45.0))
            .unwrap();
        assert_eq!(crash.len(), 30 - closed);
        assert_eq!(pm.trades().len(), 30);
        let traded: HashSet<u64> = pm.trades().iter().map(|t| t.position_id).collect();
        assert_eq!(traded.len(), 30);
    }

    #[test]
    fn failed_edit_leaves_position_untouched() {
        let mut pm = manager(0.0);
        let pos = pm
            .open("BTCUSDT", Direction::Long, 1.0, 100.0, Some(95.0), Some(110.0), base_time())
            .unwrap();
        assert!(pm.edit(pos.id, LevelEdit::Set(120.0), LevelEdit::Keep).is_err());
        let after = pm.get(pos.id).unwrap();
        assert_eq!(after.stop_loss, Some(95.0));
        assert_eq!(after.take_profit, Some(110.0));
        assert!(matches!(
            pm.edit(999, LevelEdit::Set(90.0), LevelEdit::Keep),
            Err(TradedeskError::PositionNotFound { id: 999 })
        ));
    }

    #[test]
    fn portfolio_marks_to_market() {
        let mut pm = manager(0.0);
        pm.open("BTCUSDT", Direction::Long, 10.0, 100.0, None, None, base_time())
            .unwrap();
        pm.open("ETHUSDT", Direction::Short, 5.0, 200.0, None, None, base_time())
            .unwrap();
        let prices = HashMap::from([
            ("BTCUSDT".to_string(), 110.0),
            ("ETHUSDT".to_string(), 180.0),
        ]);
        let summary = PortfolioSummary::aggregate(&pm, &prices);
        // Long +100, short +100.
        assert_abs_diff_eq!(summary.total_value, 100_200.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.cash_balance, 98_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.total_pnl_percent, 0.2, epsilon = 1e-9);
        assert_eq!(summary.open_positions, 2);
    }

    proptest! {
        #[test]
        fn pnl_sign_follows_direction(
            entry in 1.0f64..10_000.0,
            factor in 0.01f64..5.0,
            long in any::<bool>(),
        ) {
            let current = entry * factor;
            let direction = if long { Direction::Long } else { Direction::Short };
            let mut pm = manager(0.0);
            let pos = pm.open("BTCUSDT", direction, 1.0, entry, None, None, base_time()).unwrap();
            let pnl = pos.unrealized_pnl_percent(current);
            if current > entry {
                prop_assert_eq!(pnl > 0.0, long);
            } else if current < entry {
                prop_assert_eq!(pnl < 0.0, long);
            } else {
                prop_assert_eq!(pnl, 0.0);
            }
        }

        #[test]
        fn round_trip_without_costs_is_exactly_zero(
            entry in 0.5f64..50_000.0,
            quantity in 0.001f64..1.0,
            long in any::<bool>(),
        ) {
            let direction = if long { Direction::Long } else { Direction::Short };
            let mut pm = manager(0.0);
            let pos = pm.open("BTCUSDT", direction, quantity, entry, None, None, base_time()).unwrap();
            let trade = pm.close(pos.id, CloseReason::Manual, entry, base_time()).unwrap();
            prop_assert_eq!(trade.realized_pnl_percent, 0.0);
        }
    }
}

mod optimizer {
    use super::*;

    #[test]
    fn best_row_dominates_every_row() {
        let candles = hourly_wave(300);
        let base = trading_params();
        let grid = ParameterGrid {
            rsi_period: vec![10, 14],
            macd_fast: vec![8, 12],
            macd_slow: vec![26],
            macd_signal: vec![9],
            bollinger_period: vec![20],
            bollinger_width: vec![1.5, 2.0],
            risk_reward: vec![1.5, 2.5],
        };
        let report =
            run_optimization("BTCUSDT", Timeframe::H1, &candles, &base, &grid, &zero_cost()).unwrap();
        assert_eq!(report.rows.len(), 16);
        assert_eq!(report.failed, 0);
        let best = report.best().unwrap();
        for row in &report.rows {
            assert!(best.sharpe_ratio >= row.sharpe_ratio);
        }
    }

    #[test]
    fn empty_dimension_is_invalid_range() {
        let mut grid = ParameterGrid::from_params(&StrategyParams::default());
        grid.risk_reward.clear();
        let err = run_optimization(
            "BTCUSDT",
            Timeframe::H1,
            &hourly_wave(50),
            &StrategyParams::default(),
            &grid,
            &BacktestConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TradedeskError::InvalidParameterRange { ref name, .. } if name == "risk_reward"));
    }

    #[test]
    fn optimizer_agrees_with_single_backtest() {
        let candles = hourly_wave(250);
        let base = trading_params();
        let grid = ParameterGrid::from_params(&base);
        let report =
            run_optimization("BTCUSDT", Timeframe::H1, &candles, &base, &grid, &zero_cost()).unwrap();
        let direct = run_backtest("BTCUSDT", Timeframe::H1, &candles, &base, &zero_cost()).unwrap();
        let best = report.best().unwrap();
        assert_eq!(best.sharpe_ratio, direct.metrics.sharpe_ratio);
        assert_eq!(best.trade_count, direct.metrics.trade_count);
    }
}

mod live_engine {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tradedesk::adapters::paper_exchange::PaperExchange;
    use tradedesk::domain::order::Balances;
    use tradedesk::domain::signal::{AdvisoryRecord, Trend};
    use tradedesk::live::{AdvisoryClient, AdvisoryPolicy, LiveConfig, LiveEngine, PositionDesk};
    use tradedesk::ports::advisory_port::{AdvisoryPort, AdvisoryRequest};

    fn quick_policy() -> AdvisoryPolicy {
        AdvisoryPolicy {
            timeout: Duration::from_secs(1),
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn engine_with(advisory: Option<Arc<dyn AdvisoryPort>>) -> LiveEngine {
        let config = LiveConfig {
            timeframes: vec![Timeframe::H1],
            advisory: quick_policy(),
            ..LiveConfig::default()
        };
        let data = MockDataPort::new().with_candles("BTCUSDT", Timeframe::H1, hourly_wave(120));
        LiveEngine::new(
            config,
            StrategyParams::default(),
            Arc::new(PositionDesk::new(PositionManager::new(
                10_000.0,
                ExecutionCosts::default(),
            ))),
            Arc::new(PaperExchange::new(
                Balances {
                    base: 0.0,
                    quote: 10_000.0,
                },
                1_000.0,
            )),
            Arc::new(data),
            AdvisoryClient::new(advisory, quick_policy()),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn advisory_outage_degrades_to_technical_only() {
        let engine = engine_with(Some(Arc::new(DownAdvisory)));
        engine.refresh_market(now());
        let signals = engine.run_strategy(now()).await.unwrap();
        assert_eq!(signals.len(), 1);

        let board = engine.subscribe_analysis().borrow().clone();
        let analysis = board.get("BTCUSDT").unwrap();
        assert!(analysis.advisory.is_none());
        assert!(!analysis.frames.is_empty());
        assert_eq!(analysis.signal, signals[0]);
    }

    #[tokio::test]
    async fn advisory_is_attached_to_analysis() {
        let port = FixedAdvisory::new(Trend::Bullish, 0.9);
        let engine = engine_with(Some(port.clone()));
        engine.refresh_market(now());
        engine.run_strategy(now()).await.unwrap();

        assert_eq!(port.calls(), 1);
        let board = engine.subscribe_analysis().borrow().clone();
        let advisory = board["BTCUSDT"].advisory.as_ref().unwrap();
        assert_eq!(advisory.record.trend, Trend::Bullish);
        assert_eq!(advisory.received_at, now());
    }

    struct Intermittent {
        up: AtomicBool,
    }

    impl AdvisoryPort for Intermittent {
        fn analyze(&self, _request: &AdvisoryRequest) -> Result<AdvisoryRecord, TradedeskError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(AdvisoryRecord {
                    trend: Trend::Bearish,
                    confidence: 0.8,
                    ..AdvisoryRecord::neutral()
                })
            } else {
                Err(TradedeskError::external("advisory", "timeout"))
            }
        }
    }

    #[tokio::test]
    async fn last_advisory_survives_an_outage() {
        let port = Arc::new(Intermittent {
            up: AtomicBool::new(true),
        });
        let engine = engine_with(Some(port.clone()));
        engine.refresh_market(now());
        engine.run_strategy(now()).await.unwrap();

        port.up.store(false, Ordering::SeqCst);
        let later = now() + chrono::Duration::minutes(5);
        engine.run_strategy(later).await.unwrap();

        let board = engine.subscribe_analysis().borrow().clone();
        let analysis = &board["BTCUSDT"];
        assert_eq!(analysis.generated_at, later);
        let advisory = analysis.advisory.as_ref().unwrap();
        assert_eq!(advisory.record.trend, Trend::Bearish);
        assert_eq!(advisory.received_at, now());
    }

    #[tokio::test]
    async fn no_market_data_publishes_nothing() {
        let config = LiveConfig {
            symbols: vec!["ETHUSDT".to_string()],
            timeframes: vec![Timeframe::H1],
            ..LiveConfig::default()
        };
        let engine = LiveEngine::new(
            config,
            StrategyParams::default(),
            Arc::new(PositionDesk::new(PositionManager::new(
                10_000.0,
                ExecutionCosts::default(),
            ))),
            Arc::new(PaperExchange::new(
                Balances {
                    base: 0.0,
                    quote: 0.0,
                },
                1_000.0,
            )),
            Arc::new(MockDataPort::new()),
            AdvisoryClient::disabled(),
        );
        assert_eq!(engine.refresh_market(now()), 0);
        assert!(engine.run_strategy(now()).await.unwrap().is_empty());
        assert!(engine.subscribe_analysis().borrow().is_empty());
    }
}
