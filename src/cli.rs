//! CLI definition and dispatch.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::adapters::csv_adapter::{write_trades_csv, CsvAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{run_backtest, BacktestConfig, BacktestResult};
use crate::domain::candle::{Candle, Timeframe};
use crate::domain::config_validation::{
    parse_date, validate_backtest_config, validate_live_config, validate_optimizer_config,
    validate_strategy_config, OPTIMIZER_PERIOD_KEYS,
};
use crate::domain::error::TradedeskError;
use crate::domain::indicator::IndicatorConfig;
use crate::domain::optimizer::{parse_periods, parse_values, run_optimization, ParameterGrid};
use crate::domain::order::Balances;
use crate::domain::signal::{RiskConfig, SignalConfig};
use crate::domain::strategy::StrategyParams;
use crate::live::{AdvisoryPolicy, LiveConfig};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "tradedesk", about = "Strategy backtester, optimizer and paper trading desk")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay historical candles through the strategy
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        /// Write the closed trades to this CSV file
        #[arg(long)]
        trades_out: Option<PathBuf>,
    },
    /// Grid-search strategy parameters ranked by Sharpe ratio
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        /// Rows of the result table to print
        #[arg(long)]
        top: Option<usize>,
        /// Worker threads (default: one per core)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Validate every section of a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the stored data range for a symbol
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
    },
    /// Run the paper trading desk and its HTTP API
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            symbol,
            timeframe,
            trades_out,
        } => run_backtest_command(
            &config,
            symbol.as_deref(),
            timeframe.as_deref(),
            trades_out.as_deref(),
        ),
        Command::Optimize {
            config,
            symbol,
            timeframe,
            top,
            threads,
        } => run_optimize_command(&config, symbol.as_deref(), timeframe.as_deref(), top, threads),
        Command::Validate { config } => run_validate(&config),
        Command::Info {
            config,
            symbol,
            timeframe,
        } => run_info(&config, symbol.as_deref(), timeframe.as_deref()),
        Command::Serve { config } => run_serve(&config),
    }
}

fn fail(e: &TradedeskError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TradedeskError> {
    let defaults = BacktestConfig::default();
    let config = BacktestConfig {
        initial_capital: adapter.get_double("backtest", "initial_capital", defaults.initial_capital),
        commission_pct: adapter.get_double("backtest", "commission_pct", defaults.commission_pct),
        slippage_pct: adapter.get_double("backtest", "slippage_pct", defaults.slippage_pct),
        allow_shorting: adapter.get_bool("backtest", "allow_shorting", defaults.allow_shorting),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", defaults.risk_free_rate),
    };
    config.validate()?;
    Ok(config)
}

fn get_period(adapter: &dyn ConfigPort, section: &str, key: &str, default: usize) -> usize {
    let value = adapter.get_int(section, key, default as i64);
    usize::try_from(value).unwrap_or(default)
}

pub fn build_strategy_params(adapter: &dyn ConfigPort) -> Result<StrategyParams, TradedeskError> {
    let base = StrategyParams::default();
    let ind = IndicatorConfig::default();
    let sig = SignalConfig::default();
    let risk = RiskConfig::default();

    let params = StrategyParams {
        name: adapter.get_string("strategy", "name").unwrap_or(base.name),
        indicators: IndicatorConfig {
            rsi_period: get_period(adapter, "indicators", "rsi_period", ind.rsi_period),
            macd_fast: get_period(adapter, "indicators", "macd_fast", ind.macd_fast),
            macd_slow: get_period(adapter, "indicators", "macd_slow", ind.macd_slow),
            macd_signal: get_period(adapter, "indicators", "macd_signal", ind.macd_signal),
            bollinger_period: get_period(
                adapter,
                "indicators",
                "bollinger_period",
                ind.bollinger_period,
            ),
            bollinger_width: adapter.get_double("indicators", "bollinger_width", ind.bollinger_width),
            atr_period: get_period(adapter, "indicators", "atr_period", ind.atr_period),
        },
        signal: SignalConfig {
            rsi_overbought: adapter.get_double("signal", "rsi_overbought", sig.rsi_overbought),
            rsi_oversold: adapter.get_double("signal", "rsi_oversold", sig.rsi_oversold),
            bollinger_extreme: adapter.get_double("signal", "bollinger_extreme", sig.bollinger_extreme),
            buy_threshold: adapter.get_double("signal", "buy_threshold", sig.buy_threshold),
            advisory_ttl_minutes: adapter.get_int(
                "signal",
                "advisory_ttl_minutes",
                sig.advisory_ttl_minutes,
            ),
            advisory_min_confidence: adapter.get_double(
                "signal",
                "advisory_min_confidence",
                sig.advisory_min_confidence,
            ),
            stop_atr_multiple: adapter.get_double("signal", "stop_atr_multiple", sig.stop_atr_multiple),
            fallback_stop_percent: adapter.get_double(
                "signal",
                "fallback_stop_percent",
                sig.fallback_stop_percent,
            ),
            volatility_lookback: get_period(
                adapter,
                "signal",
                "volatility_lookback",
                sig.volatility_lookback,
            ),
        },
        risk: RiskConfig {
            risk_reward: adapter.get_double("risk", "risk_reward", risk.risk_reward),
            max_risk_percent: adapter.get_double("risk", "max_risk_percent", risk.max_risk_percent),
            max_position_value: adapter.get_double(
                "risk",
                "max_position_value",
                risk.max_position_value,
            ),
            max_trades_per_day: u32::try_from(adapter.get_int(
                "risk",
                "max_trades_per_day",
                i64::from(risk.max_trades_per_day),
            ))
            .unwrap_or(risk.max_trades_per_day),
        },
        reversal: adapter.get_bool("risk", "reversal", base.reversal),
    };
    params.validate()?;
    Ok(params)
}

/// `[optimizer]` ranges; a tunable without a key stays at `base`'s value.
pub fn build_parameter_grid(
    adapter: &dyn ConfigPort,
    base: &StrategyParams,
) -> Result<ParameterGrid, TradedeskError> {
    let mut grid = ParameterGrid::from_params(base);
    for key in OPTIMIZER_PERIOD_KEYS {
        let Some(text) = adapter.get_string("optimizer", key) else {
            continue;
        };
        let values = parse_periods(key, &text)?;
        match key {
            "rsi_period" => grid.rsi_period = values,
            "macd_fast" => grid.macd_fast = values,
            "macd_slow" => grid.macd_slow = values,
            "macd_signal" => grid.macd_signal = values,
            _ => grid.bollinger_period = values,
        }
    }
    if let Some(text) = adapter.get_string("optimizer", "bollinger_width") {
        grid.bollinger_width = parse_values("bollinger_width", &text)?;
    }
    if let Some(text) = adapter.get_string("optimizer", "risk_reward") {
        grid.risk_reward = parse_values("risk_reward", &text)?;
    }
    Ok(grid)
}

fn parse_timeframe(section: &str, key: &str, text: &str) -> Result<Timeframe, TradedeskError> {
    text.trim()
        .parse()
        .map_err(|e: TradedeskError| TradedeskError::config_invalid(section, key, e.to_string()))
}

fn get_secs(adapter: &dyn ConfigPort, key: &str, default: Duration) -> Duration {
    let secs = adapter.get_int("live", key, default.as_secs() as i64);
    u64::try_from(secs).map(Duration::from_secs).unwrap_or(default)
}

pub fn build_live_config(adapter: &dyn ConfigPort) -> Result<LiveConfig, TradedeskError> {
    let defaults = LiveConfig::default();

    let symbols: Vec<String> = adapter
        .get_list("live", "symbols")
        .into_iter()
        .map(|s| s.to_uppercase())
        .collect();
    if symbols.is_empty() {
        return Err(TradedeskError::ConfigMissing {
            section: "live".to_string(),
            key: "symbols".to_string(),
        });
    }

    let mut timeframes = adapter
        .get_list("live", "timeframes")
        .iter()
        .map(|t| parse_timeframe("live", "timeframes", t))
        .collect::<Result<Vec<_>, _>>()?;
    if timeframes.is_empty() {
        timeframes = defaults.timeframes.clone();
    }
    timeframes.sort();
    timeframes.dedup();

    let primary_timeframe = match adapter.get_string("live", "primary_timeframe") {
        Some(t) => parse_timeframe("live", "primary_timeframe", &t)?,
        None => timeframes[0],
    };
    if !timeframes.contains(&primary_timeframe) {
        timeframes.insert(0, primary_timeframe);
        timeframes.sort();
    }

    let listen = match adapter.get_string("live", "listen") {
        Some(text) => text.trim().parse().map_err(|e: std::net::AddrParseError| {
            TradedeskError::config_invalid("live", "listen", e.to_string())
        })?,
        None => defaults.listen,
    };

    let retries = adapter.get_int("live", "advisory_retries", defaults.advisory.retries as i64);
    let backoff_ms = adapter.get_int(
        "live",
        "advisory_backoff_ms",
        defaults.advisory.backoff.as_millis() as i64,
    );

    Ok(LiveConfig {
        symbols,
        timeframes,
        primary_timeframe,
        positions_interval: get_secs(adapter, "positions_interval_secs", defaults.positions_interval),
        market_interval: get_secs(adapter, "market_interval_secs", defaults.market_interval),
        strategy_interval: get_secs(adapter, "strategy_interval_secs", defaults.strategy_interval),
        advisory: AdvisoryPolicy {
            timeout: get_secs(adapter, "advisory_timeout_secs", defaults.advisory.timeout),
            retries: u32::try_from(retries).unwrap_or(defaults.advisory.retries),
            backoff: u64::try_from(backoff_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.advisory.backoff),
        },
        auto_execute: adapter.get_bool("live", "auto_execute", defaults.auto_execute),
        listen,
        history_candles: get_period(adapter, "live", "history_candles", defaults.history_candles),
        initial_balances: Balances {
            base: adapter.get_double("live", "initial_btc", defaults.initial_balances.base),
            quote: adapter.get_double("live", "initial_usdt", defaults.initial_balances.quote),
        },
    })
}

/// Symbol and timeframe from the flags, else `[backtest]`.
pub fn resolve_market(
    adapter: &dyn ConfigPort,
    symbol: Option<&str>,
    timeframe: Option<&str>,
) -> Result<(String, Timeframe), TradedeskError> {
    let symbol = symbol
        .map(str::to_string)
        .or_else(|| adapter.get_string("backtest", "symbol"))
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TradedeskError::ConfigMissing {
            section: "backtest".to_string(),
            key: "symbol".to_string(),
        })?;
    Ok((symbol, resolve_timeframe(adapter, timeframe)?))
}

/// The flag, else `[backtest] timeframe`, else 1h.
pub fn resolve_timeframe(
    adapter: &dyn ConfigPort,
    timeframe: Option<&str>,
) -> Result<Timeframe, TradedeskError> {
    match timeframe
        .map(str::to_string)
        .or_else(|| adapter.get_string("backtest", "timeframe"))
    {
        Some(t) => parse_timeframe("backtest", "timeframe", &t),
        None => Ok(Timeframe::H1),
    }
}

pub fn data_port_from_config(adapter: &dyn ConfigPort) -> CsvAdapter {
    let dir = adapter
        .get_string("backtest", "data_dir")
        .unwrap_or_else(|| "data".to_string());
    CsvAdapter::new(PathBuf::from(dir))
}

/// Candles between `[backtest] start_date` and `end_date` (inclusive days),
/// defaulting to the stored range.
pub fn load_candles(
    data_port: &dyn DataPort,
    adapter: &dyn ConfigPort,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, TradedeskError> {
    let Some((first, last, _)) = data_port.data_range(symbol, timeframe)? else {
        return Err(TradedeskError::Data {
            reason: format!("no {timeframe} data for {symbol}"),
        });
    };
    let day_start = |d: NaiveDate| -> DateTime<Utc> { d.and_time(NaiveTime::MIN).and_utc() };
    let start = parse_date(adapter.get_string("backtest", "start_date"), "start_date")?
        .map(day_start)
        .unwrap_or(first);
    let end = parse_date(adapter.get_string("backtest", "end_date"), "end_date")?
        .and_then(|d| d.succ_opt())
        .map(|d| day_start(d) - chrono::Duration::milliseconds(1))
        .unwrap_or(last);
    if start > end {
        return Err(TradedeskError::config_invalid(
            "backtest",
            "start_date",
            "start_date is after end_date",
        ));
    }
    data_port.fetch_candles(symbol, timeframe, start, end)
}

fn run_backtest_command(
    config_path: &Path,
    symbol: Option<&str>,
    timeframe: Option<&str>,
    trades_out: Option<&Path>,
) -> ExitCode {
    // Stage 1: Load config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    // Stage 2: Validate
    if let Err(e) = validate_backtest_config(&adapter).and(validate_strategy_config(&adapter)) {
        return fail(&e);
    }

    // Stage 3: Build immutable run parameters
    let (params, bt_config, (symbol, timeframe)) = match (
        build_strategy_params(&adapter),
        build_backtest_config(&adapter),
        resolve_market(&adapter, symbol, timeframe),
    ) {
        (Ok(p), Ok(c), Ok(m)) => (p, c, m),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return fail(&e),
    };
    eprintln!("Strategy: {}", params.name);

    let data_port = data_port_from_config(&adapter);
    run_backtest_pipeline(
        &data_port,
        &adapter,
        &symbol,
        timeframe,
        &params,
        &bt_config,
        trades_out,
    )
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    adapter: &dyn ConfigPort,
    symbol: &str,
    timeframe: Timeframe,
    params: &StrategyParams,
    bt_config: &BacktestConfig,
    trades_out: Option<&Path>,
) -> ExitCode {
    // Stage 4: Load candles
    let candles = match load_candles(data_port, adapter, symbol, timeframe) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    eprintln!("Running backtest: {symbol} {timeframe}, {} candles", candles.len());

    // Stage 5: Replay
    let result = match run_backtest(symbol, timeframe, &candles, params, bt_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    // Stage 6: Console summary
    print_summary(&result);

    // Stage 7: Optional trade export
    if let Some(path) = trades_out {
        if let Err(e) = write_trades_csv(path, &result.trades) {
            return fail(&e);
        }
        eprintln!("\nTrades written to: {}", path.display());
    }
    ExitCode::SUCCESS
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Backtest Results ===");
    if let (Some(start), Some(end)) = (result.start(), result.end()) {
        eprintln!("Period:           {start} to {end}");
    }
    eprintln!("Initial Capital:  {:.2}", result.initial_capital);
    eprintln!("Final Equity:     {:.2}", result.final_equity());
    eprintln!("Total Return:     {:.2}%", m.total_return_percent);
    eprintln!("Annualized:       {:.2}%", m.annualized_return_percent);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown_percent);
    eprintln!("Total Trades:     {}", m.trade_count);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Avg Win/Loss:     {:.2}", m.avg_win_loss_ratio);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    eprintln!("Signals:          {}", result.signals_evaluated);
    if !result.gaps.is_empty() {
        eprintln!("\n=== Data Gaps ({}) ===", result.gaps.len());
        for gap in result.gaps.iter().take(10) {
            eprintln!("  {}: {}", gap.at, gap.kind);
        }
    }
}

fn run_optimize_command(
    config_path: &Path,
    symbol: Option<&str>,
    timeframe: Option<&str>,
    top: Option<usize>,
    threads: Option<usize>,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter)
        .and(validate_strategy_config(&adapter))
        .and(validate_optimizer_config(&adapter))
    {
        return fail(&e);
    }

    // Stage 2: Build parameters and grid
    let params = match build_strategy_params(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let (grid, bt_config, (symbol, timeframe)) = match (
        build_parameter_grid(&adapter, &params),
        build_backtest_config(&adapter),
        resolve_market(&adapter, symbol, timeframe),
    ) {
        (Ok(g), Ok(c), Ok(m)) => (g, c, m),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return fail(&e),
    };
    let top = top.unwrap_or_else(|| get_period(&adapter, "optimizer", "top", 10));
    let threads = threads.or_else(|| {
        adapter
            .get_string("optimizer", "threads")
            .and_then(|t| t.trim().parse().ok())
    });

    // Stage 3: Worker pool
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    let pool = match builder.build() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: failed to start worker pool: {e}");
            return ExitCode::from(1);
        }
    };

    let data_port = data_port_from_config(&adapter);
    pool.install(|| {
        run_optimize_pipeline(
            &data_port,
            &adapter,
            &symbol,
            timeframe,
            &params,
            &grid,
            &bt_config,
            top,
        )
    })
}

#[allow(clippy::too_many_arguments)]
pub fn run_optimize_pipeline(
    data_port: &dyn DataPort,
    adapter: &dyn ConfigPort,
    symbol: &str,
    timeframe: Timeframe,
    params: &StrategyParams,
    grid: &ParameterGrid,
    bt_config: &BacktestConfig,
    top: usize,
) -> ExitCode {
    // Stage 4: Load candles once, shared read-only by every worker
    let candles = match load_candles(data_port, adapter, symbol, timeframe) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    eprintln!(
        "Optimizing {symbol} {timeframe}: {} candles, {} grid points",
        candles.len(),
        grid.len()
    );

    // Stage 5: Sweep
    let report = match run_optimization(symbol, timeframe, &candles, params, grid, bt_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    // Stage 6: Result table
    println!(
        "{:>4} {:>4} {:>4} {:>4} {:>4} {:>4} {:>6} {:>5} {:>8} {:>9} {:>8} {:>6} {:>6}",
        "rank", "rsi", "fast", "slow", "sig", "bb", "width", "rr", "sharpe", "return%", "maxdd%",
        "win%", "trades"
    );
    for (i, row) in report.rows.iter().take(top).enumerate() {
        let p = &row.parameters;
        println!(
            "{:>4} {:>4} {:>4} {:>4} {:>4} {:>4} {:>6.2} {:>5.2} {:>8.3} {:>9.2} {:>8.2} {:>6.1} {:>6}",
            i + 1,
            p.rsi_period,
            p.macd_fast,
            p.macd_slow,
            p.macd_signal,
            p.bollinger_period,
            p.bollinger_width,
            p.risk_reward,
            row.sharpe_ratio,
            row.total_return_percent,
            row.max_drawdown_percent,
            row.win_rate * 100.0,
            row.trade_count
        );
    }

    eprintln!("\n=== Optimization Summary ===");
    eprintln!("Evaluated:        {}", report.rows.len());
    eprintln!("Skipped:          {}", report.skipped);
    eprintln!("Failed:           {}", report.failed);
    match report.best() {
        Some(best) => {
            eprintln!(
                "Best:             sharpe {:.3}, return {:.2}%",
                best.sharpe_ratio, best.total_return_percent
            );
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("error: every grid point failed");
            ExitCode::from(1)
        }
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let checks: [(&str, fn(&dyn ConfigPort) -> Result<(), TradedeskError>); 3] = [
        ("backtest", validate_backtest_config),
        ("strategy", validate_strategy_config),
        ("optimizer", validate_optimizer_config),
    ];
    for (name, check) in checks {
        if let Err(e) = check(&adapter) {
            return fail(&e);
        }
        eprintln!("  {name}: ok");
    }

    let params = match build_strategy_params(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    if let Err(e) = build_backtest_config(&adapter) {
        return fail(&e);
    }
    match build_parameter_grid(&adapter, &params).and_then(|g| g.points().map(|p| (g, p))) {
        Ok((grid, (points, skipped))) => {
            eprintln!(
                "  grid: {} points ({} runnable, {skipped} skipped)",
                grid.len(),
                points.len()
            );
        }
        Err(e) => return fail(&e),
    }

    if adapter.get_string("live", "symbols").is_some() {
        if let Err(e) = validate_live_config(&adapter).and_then(|_| build_live_config(&adapter)) {
            return fail(&e);
        }
        eprintln!("  live: ok");
    }

    eprintln!("\nStrategy: {}", params.name);
    eprintln!("  warm-up: {} candles", params.indicators.warmup());
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_info(config_path: &Path, symbol: Option<&str>, timeframe: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data_port = data_port_from_config(&adapter);

    let timeframe = match resolve_timeframe(&adapter, timeframe) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };

    let symbols = match symbol {
        Some(s) => vec![s.to_uppercase()],
        None => match data_port.list_symbols(timeframe) {
            Ok(s) => s,
            Err(e) => return fail(&e),
        },
    };
    if symbols.is_empty() {
        eprintln!("No {timeframe} data found");
        return ExitCode::SUCCESS;
    }

    for s in &symbols {
        match data_port.data_range(s, timeframe) {
            Ok(Some((first, last, count))) => {
                println!("{s} {timeframe}: {count} candles, {first} to {last}");
            }
            Ok(None) => eprintln!("{s} {timeframe}: no data found"),
            Err(e) => eprintln!("error reading {s} {timeframe}: {e}"),
        }
    }
    ExitCode::SUCCESS
}

fn run_serve(config_path: &Path) -> ExitCode {
    #[cfg(feature = "web")]
    {
        use crate::adapters::paper_exchange::PaperExchange;
        use crate::adapters::web::{build_router, AppState};
        use crate::domain::position_manager::PositionManager;
        use crate::live::{AdvisoryClient, LiveEngine, PositionDesk};
        use crate::ports::exchange_port::ExchangeGateway;
        use std::sync::Arc;
        use tokio::sync::watch;

        // Stage 1: Load and validate config
        eprintln!("Loading config from {}", config_path.display());
        let adapter = match load_config(config_path) {
            Ok(c) => c,
            Err(code) => return code,
        };
        if let Err(e) = validate_backtest_config(&adapter)
            .and(validate_strategy_config(&adapter))
            .and(validate_live_config(&adapter))
        {
            return fail(&e);
        }
        let (params, bt_config, live) = match (
            build_strategy_params(&adapter),
            build_backtest_config(&adapter),
            build_live_config(&adapter),
        ) {
            (Ok(p), Ok(c), Ok(l)) => (p, c, l),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return fail(&e),
        };

        // Stage 2: Wire the desk, exchange and engine
        let exchange: Arc<dyn ExchangeGateway> = Arc::new(
            PaperExchange::new(live.initial_balances, params.risk.max_position_value)
                .with_daily_trade_limit(params.risk.max_trades_per_day),
        );
        let desk = Arc::new(PositionDesk::new(PositionManager::new(
            live.initial_balances.quote,
            bt_config.costs(),
        )));
        log::info!("no advisory service configured; signals are technical-only");
        let advisory = AdvisoryClient::new(None, live.advisory);
        let addr = live.listen;
        let engine = Arc::new(LiveEngine::new(
            live,
            params,
            Arc::clone(&desk),
            Arc::clone(&exchange),
            Arc::new(data_port_from_config(&adapter)),
            advisory,
        ));
        let state = AppState {
            desk,
            exchange,
            analysis: engine.subscribe_analysis(),
        };
        let router = build_router(state);

        // Stage 3: Run until Ctrl-C
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => return fail(&TradedeskError::Io(e)),
        };
        let result: Result<(), TradedeskError> = runtime.block_on(async move {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let tasks = Arc::clone(&engine).spawn(shutdown_rx);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            eprintln!("Serving on http://{addr}");
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("failed to listen for Ctrl-C: {e}");
                    }
                    eprintln!("\nShutting down...");
                })
                .await;

            // Let in-flight ticks finish before the runtime goes away.
            shutdown_tx.send_replace(true);
            for task in tasks {
                if let Err(e) = task.await {
                    log::error!("ticker task failed: {e}");
                }
            }
            served?;
            Ok(())
        });

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(&e),
        }
    }

    #[cfg(not(feature = "web"))]
    {
        let _ = config_path;
        eprintln!("error: web feature is required for serve");
        ExitCode::from(1)
    }
}
