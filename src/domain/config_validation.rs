//! Configuration validation.
//!
//! `ConfigPort` getters fall back to defaults on unparseable values, so every
//! key that is present is checked here first. Cross-field rules on the built
//! parameters live in `StrategyParams::validate` and `BacktestConfig::validate`.

use chrono::NaiveDate;
use std::net::SocketAddr;

use crate::domain::candle::Timeframe;
use crate::domain::error::TradedeskError;
use crate::domain::optimizer::{parse_periods, parse_values};
use crate::ports::config_port::ConfigPort;

pub const INDICATOR_PERIOD_KEYS: [&str; 6] = [
    "rsi_period",
    "macd_fast",
    "macd_slow",
    "macd_signal",
    "bollinger_period",
    "atr_period",
];

pub const OPTIMIZER_PERIOD_KEYS: [&str; 5] = [
    "rsi_period",
    "macd_fast",
    "macd_slow",
    "macd_signal",
    "bollinger_period",
];

pub const OPTIMIZER_VALUE_KEYS: [&str; 2] = ["bollinger_width", "risk_reward"];

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    validate_numbers(
        config,
        "backtest",
        &["initial_capital", "commission_pct", "slippage_pct", "risk_free_rate"],
    )?;
    validate_bools(config, "backtest", &["allow_shorting"])?;
    validate_initial_capital(config)?;
    validate_percent(config, "backtest", "commission_pct")?;
    validate_percent(config, "backtest", "slippage_pct")?;
    validate_risk_free_rate(config)?;
    validate_timeframe(config, "backtest", "timeframe")?;
    validate_dates(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    validate_periods(config, "indicators", &INDICATOR_PERIOD_KEYS)?;
    validate_numbers(config, "indicators", &["bollinger_width"])?;
    validate_numbers(
        config,
        "signal",
        &[
            "rsi_overbought",
            "rsi_oversold",
            "bollinger_extreme",
            "buy_threshold",
            "advisory_min_confidence",
            "stop_atr_multiple",
            "fallback_stop_percent",
        ],
    )?;
    validate_periods(config, "signal", &["advisory_ttl_minutes", "volatility_lookback"])?;
    validate_numbers(
        config,
        "risk",
        &["risk_reward", "max_risk_percent", "max_position_value"],
    )?;
    validate_periods(config, "risk", &["max_trades_per_day"])?;
    validate_bools(config, "risk", &["reversal"])?;
    Ok(())
}

pub fn validate_optimizer_config(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    for key in OPTIMIZER_PERIOD_KEYS {
        if let Some(text) = config.get_string("optimizer", key) {
            parse_periods(key, &text)?;
        }
    }
    for key in OPTIMIZER_VALUE_KEYS {
        if let Some(text) = config.get_string("optimizer", key) {
            parse_values(key, &text)?;
        }
    }
    validate_periods(config, "optimizer", &["threads", "top"])?;
    Ok(())
}

pub fn validate_live_config(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    validate_symbols(config)?;
    validate_timeframe_list(config)?;
    validate_timeframe(config, "live", "primary_timeframe")?;
    validate_periods(
        config,
        "live",
        &[
            "positions_interval_secs",
            "market_interval_secs",
            "strategy_interval_secs",
            "advisory_timeout_secs",
            "history_candles",
        ],
    )?;
    validate_integers(config, "live", &["advisory_retries", "advisory_backoff_ms"])?;
    validate_numbers(config, "live", &["initial_usdt", "initial_btc"])?;
    validate_bools(config, "live", &["auto_execute"])?;
    validate_listen(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradedeskError {
    TradedeskError::config_invalid(section, key, reason)
}

fn validate_numbers(
    config: &dyn ConfigPort,
    section: &str,
    keys: &[&str],
) -> Result<(), TradedeskError> {
    for key in keys {
        if let Some(raw) = config.get_string(section, key) {
            match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {}
                _ => return Err(invalid(section, key, format!("{raw:?} is not a number"))),
            }
        }
    }
    Ok(())
}

fn validate_integers(
    config: &dyn ConfigPort,
    section: &str,
    keys: &[&str],
) -> Result<(), TradedeskError> {
    for key in keys {
        if let Some(raw) = config.get_string(section, key) {
            if raw.trim().parse::<u64>().is_err() {
                return Err(invalid(
                    section,
                    key,
                    format!("{raw:?} is not a non-negative integer"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_periods(
    config: &dyn ConfigPort,
    section: &str,
    keys: &[&str],
) -> Result<(), TradedeskError> {
    validate_integers(config, section, keys)?;
    for key in keys {
        if config.get_string(section, key).is_some() && config.get_int(section, key, 0) < 1 {
            return Err(invalid(section, key, format!("{key} must be at least 1")));
        }
    }
    Ok(())
}

fn validate_bools(
    config: &dyn ConfigPort,
    section: &str,
    keys: &[&str],
) -> Result<(), TradedeskError> {
    for key in keys {
        if let Some(raw) = config.get_string(section, key) {
            let known = matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "false" | "yes" | "no" | "1" | "0"
            );
            if !known {
                return Err(invalid(section, key, format!("{raw:?} is not a boolean")));
            }
        }
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    let value = config.get_double("backtest", "initial_capital", 10_000.0);
    if value <= 0.0 {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_percent(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradedeskError> {
    let value = config.get_double(section, key, 0.0);
    if !(0.0..100.0).contains(&value) {
        return Err(invalid(section, key, format!("{key} must be in [0, 100)")));
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    let value = config.get_double("backtest", "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_timeframe(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradedeskError> {
    if let Some(raw) = config.get_string(section, key) {
        raw.trim()
            .parse::<Timeframe>()
            .map_err(|e| invalid(section, key, e.to_string()))?;
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    let start = parse_date(config.get_string("backtest", "start_date"), "start_date")?;
    let end = parse_date(config.get_string("backtest", "end_date"), "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(invalid(
                "backtest",
                "start_date",
                "start_date must be before end_date",
            ));
        }
    }
    Ok(())
}

/// Parse an optional `YYYY-MM-DD` value from `[backtest]`.
pub fn parse_date(value: Option<String>, key: &str) -> Result<Option<NaiveDate>, TradedeskError> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                invalid(
                    "backtest",
                    key,
                    format!("invalid {key} format, expected YYYY-MM-DD"),
                )
            })
        })
        .transpose()
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    match config.get_string("live", "symbols") {
        None => Err(TradedeskError::ConfigMissing {
            section: "live".to_string(),
            key: "symbols".to_string(),
        }),
        Some(s) if s.split(',').all(|sym| sym.trim().is_empty()) => {
            Err(invalid("live", "symbols", "at least one symbol is required"))
        }
        Some(_) => Ok(()),
    }
}

fn validate_timeframe_list(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    if let Some(raw) = config.get_string("live", "timeframes") {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            part.parse::<Timeframe>()
                .map_err(|e| invalid("live", "timeframes", e.to_string()))?;
        }
    }
    Ok(())
}

fn validate_listen(config: &dyn ConfigPort) -> Result<(), TradedeskError> {
    if let Some(raw) = config.get_string("live", "listen") {
        raw.trim()
            .parse::<SocketAddr>()
            .map_err(|e| invalid("live", "listen", e.to_string()))?;
    }
    Ok(())
}
