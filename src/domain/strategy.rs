//! Immutable strategy parameters passed explicitly into every run.

use serde::{Deserialize, Serialize};

use super::error::TradedeskError;
use super::indicator::IndicatorConfig;
use super::signal::{RiskConfig, SignalConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub name: String,
    pub indicators: IndicatorConfig,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    /// Close an open position on an opposing signal and open the other way.
    pub reversal: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            name: "rsi-macd-bollinger".to_string(),
            indicators: IndicatorConfig::default(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            reversal: false,
        }
    }
}

impl StrategyParams {
    /// Reject parameter combinations no run could use.
    pub fn validate(&self) -> Result<(), TradedeskError> {
        let ind = &self.indicators;
        for (key, period) in [
            ("rsi_period", ind.rsi_period),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("macd_signal", ind.macd_signal),
            ("bollinger_period", ind.bollinger_period),
            ("atr_period", ind.atr_period),
        ] {
            if period == 0 {
                return Err(TradedeskError::config_invalid(
                    "indicators",
                    key,
                    "period must be at least 1",
                ));
            }
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(TradedeskError::config_invalid(
                "indicators",
                "macd_fast",
                format!(
                    "macd_fast ({}) must be below macd_slow ({})",
                    ind.macd_fast, ind.macd_slow
                ),
            ));
        }
        if ind.bollinger_width.is_nan() || ind.bollinger_width <= 0.0 {
            return Err(TradedeskError::config_invalid(
                "indicators",
                "bollinger_width",
                "bollinger_width must be positive",
            ));
        }

        let sig = &self.signal;
        if !(0.0..=100.0).contains(&sig.rsi_oversold)
            || !(0.0..=100.0).contains(&sig.rsi_overbought)
            || sig.rsi_oversold >= sig.rsi_overbought
        {
            return Err(TradedeskError::config_invalid(
                "signal",
                "rsi_oversold",
                "need 0 <= rsi_oversold < rsi_overbought <= 100",
            ));
        }
        if !(0.0..50.0).contains(&sig.bollinger_extreme) {
            return Err(TradedeskError::config_invalid(
                "signal",
                "bollinger_extreme",
                "bollinger_extreme must be in [0, 50)",
            ));
        }
        if !(0.0..1.0).contains(&sig.buy_threshold) {
            return Err(TradedeskError::config_invalid(
                "signal",
                "buy_threshold",
                "buy_threshold must be in [0, 1)",
            ));
        }
        if sig.stop_atr_multiple <= 0.0 || sig.fallback_stop_percent <= 0.0 {
            return Err(TradedeskError::config_invalid(
                "signal",
                "stop_atr_multiple",
                "stop distances must be positive",
            ));
        }

        let risk = &self.risk;
        if risk.risk_reward.is_nan() || risk.risk_reward <= 0.0 {
            return Err(TradedeskError::config_invalid(
                "risk",
                "risk_reward",
                "risk_reward must be positive",
            ));
        }
        if !(risk.max_risk_percent > 0.0 && risk.max_risk_percent <= 100.0) {
            return Err(TradedeskError::config_invalid(
                "risk",
                "max_risk_percent",
                "max_risk_percent must be in (0, 100]",
            ));
        }
        if risk.max_position_value.is_nan() || risk.max_position_value <= 0.0 {
            return Err(TradedeskError::config_invalid(
                "risk",
                "max_position_value",
                "max_position_value must be positive",
            ));
        }
        if risk.max_trades_per_day == 0 {
            return Err(TradedeskError::config_invalid(
                "risk",
                "max_trades_per_day",
                "max_trades_per_day must be at least 1",
            ));
        }
        Ok(())
    }
}
