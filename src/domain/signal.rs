//! Signal generation: indicator readings plus an optional advisory record in,
//! one trading signal out.
//!
//! Decision policy:
//! 1. Each timeframe scores RSI extremes, MACD direction and Bollinger
//!    extremity as -1/0/+1 and averages them. Timeframes are weighted by
//!    duration rank, longest heaviest.
//! 2. A fresh advisory with enough confidence scales the score by
//!    `1 + confidence × alignment`. Otherwise the score is technical only.
//! 3. `score > threshold` buys, `score < -threshold` sells, anything else
//!    (including a tie) holds.
//! 4. Levels come from ATR (or a fallback percentage), risk level from the
//!    stop distance relative to recent volatility, size from a
//!    fixed-fractional rule with hard caps.
//!
//! Everything here is pure: no clock, no I/O.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::candle::Timeframe;
use super::error::TradedeskError;
use super::indicator::IndicatorSet;
use super::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Action::Buy => Some(Direction::Long),
            Action::Sell => Some(Direction::Short),
            Action::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    /// +1 bullish, -1 bearish, 0 neutral.
    pub fn bias(&self) -> f64 {
        match self {
            Trend::Bullish => 1.0,
            Trend::Bearish => -1.0,
            Trend::Neutral => 0.0,
        }
    }
}

impl FromStr for Trend {
    type Err = TradedeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" | "up" => Ok(Trend::Bullish),
            "bearish" | "down" => Ok(Trend::Bearish),
            "neutral" | "sideways" => Ok(Trend::Neutral),
            other => Err(TradedeskError::Data {
                reason: format!("unknown trend '{other}'"),
            }),
        }
    }
}

/// Structured output of the qualitative advisory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryRecord {
    pub trend: Trend,
    #[serde(default)]
    pub support_levels: Vec<f64>,
    #[serde(default)]
    pub resistance_levels: Vec<f64>,
    /// Market sentiment in [-1, 1].
    #[serde(default)]
    pub sentiment: f64,
    /// In [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub volume_analysis: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AdvisoryRecord {
    /// The record used when the service is unavailable.
    pub fn neutral() -> Self {
        AdvisoryRecord {
            trend: Trend::Neutral,
            support_levels: Vec::new(),
            resistance_levels: Vec::new(),
            sentiment: 0.0,
            confidence: 0.0,
            volume_analysis: None,
            reasoning: None,
        }
    }
}

/// An advisory record stamped with when it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAdvisory {
    pub record: AdvisoryRecord,
    pub received_at: DateTime<Utc>,
}

impl TimedAdvisory {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now >= self.received_at && now - self.received_at <= ttl
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// Distance from either band, in band percent, that counts as extreme.
    pub bollinger_extreme: f64,
    /// Buy above this score, sell below its negation.
    pub buy_threshold: f64,
    pub advisory_ttl_minutes: i64,
    pub advisory_min_confidence: f64,
    pub stop_atr_multiple: f64,
    /// Stop distance as a percent of entry when ATR is not available.
    pub fallback_stop_percent: f64,
    /// Closes used for the volatility estimate behind the risk level.
    pub volatility_lookback: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            bollinger_extreme: 10.0,
            buy_threshold: 0.35,
            advisory_ttl_minutes: 30,
            advisory_min_confidence: 0.3,
            stop_atr_multiple: 1.5,
            fallback_stop_percent: 1.0,
            volatility_lookback: 20,
        }
    }
}

impl SignalConfig {
    pub fn advisory_ttl(&self) -> Duration {
        Duration::minutes(self.advisory_ttl_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Target distance as a multiple of stop distance.
    pub risk_reward: f64,
    /// Percent of equity put at risk by a level-1 trade.
    pub max_risk_percent: f64,
    /// Largest notional for one position, in quote currency.
    pub max_position_value: f64,
    /// Buy fills the exchange accepts per UTC day.
    pub max_trades_per_day: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            risk_reward: 2.0,
            max_risk_percent: 2.0,
            max_position_value: 1_000.0,
            max_trades_per_day: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    pub symbol: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Base-asset quantity.
    pub position_size: f64,
    pub risk_level: u8,
    pub time_frame: Timeframe,
    pub conditions: Vec<String>,
    pub rationale: String,
    pub confidence: f64,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    fn hold(inputs: &SignalInputs<'_>, conditions: Vec<String>, score: f64, rationale: String) -> Self {
        Signal {
            action: Action::Hold,
            symbol: inputs.symbol.to_string(),
            entry_price: inputs.last_close,
            stop_loss: None,
            take_profit: None,
            position_size: 0.0,
            risk_level: 1,
            time_frame: inputs.primary_timeframe,
            conditions,
            rationale,
            confidence: score.abs().min(1.0),
            score,
            generated_at: inputs.now,
        }
    }
}

/// Everything the generator looks at for one decision.
#[derive(Debug, Clone)]
pub struct SignalInputs<'a> {
    pub symbol: &'a str,
    pub primary_timeframe: Timeframe,
    pub frames: &'a [(Timeframe, IndicatorSet)],
    pub last_close: f64,
    /// Standard deviation of recent close-to-close returns, in percent.
    pub recent_volatility_percent: Option<f64>,
    pub equity: f64,
    pub advisory: Option<&'a TimedAdvisory>,
    pub now: DateTime<Utc>,
}

/// Standard deviation of close-to-close returns in percent.
///
/// `None` with fewer than three closes.
pub fn recent_volatility_percent(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() * 100.0)
}

/// Score one timeframe in [-1, 1]; `None` when no directional indicator is set.
fn score_frame(
    timeframe: Timeframe,
    set: &IndicatorSet,
    config: &SignalConfig,
    conditions: &mut Vec<String>,
) -> Option<f64> {
    let mut components = Vec::with_capacity(3);

    if let Some(rsi) = set.rsi {
        let c = if rsi <= config.rsi_oversold {
            conditions.push(format!("RSI({timeframe}) {rsi:.1} oversold"));
            1.0
        } else if rsi >= config.rsi_overbought {
            conditions.push(format!("RSI({timeframe}) {rsi:.1} overbought"));
            -1.0
        } else {
            0.0
        };
        components.push(c);
    }

    if let Some(macd) = set.macd {
        let c = if macd.histogram > 0.0 {
            conditions.push(format!("MACD({timeframe}) above signal"));
            1.0
        } else if macd.histogram < 0.0 {
            conditions.push(format!("MACD({timeframe}) below signal"));
            -1.0
        } else {
            0.0
        };
        components.push(c);
    }

    if let Some(raw) = set.bollinger_position_raw {
        let c = if raw <= config.bollinger_extreme {
            conditions.push(format!("Bollinger({timeframe}) near lower band ({raw:.1}%)"));
            1.0
        } else if raw >= 100.0 - config.bollinger_extreme {
            conditions.push(format!("Bollinger({timeframe}) near upper band ({raw:.1}%)"));
            -1.0
        } else {
            0.0
        };
        components.push(c);
    }

    if components.is_empty() {
        return None;
    }
    Some(components.iter().sum::<f64>() / components.len() as f64)
}

/// Weighted technical score across frames; `None` when no frame is warm.
fn technical_score(
    frames: &[(Timeframe, IndicatorSet)],
    config: &SignalConfig,
    conditions: &mut Vec<String>,
) -> Option<f64> {
    let mut ordered: Vec<&(Timeframe, IndicatorSet)> = frames.iter().collect();
    ordered.sort_by_key(|(tf, _)| *tf);

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (rank, (tf, set)) in ordered.into_iter().enumerate() {
        if let Some(score) = score_frame(*tf, set, config, conditions) {
            let weight = (rank + 1) as f64;
            weighted += weight * score;
            total_weight += weight;
        }
    }
    if total_weight == 0.0 {
        None
    } else {
        Some(weighted / total_weight)
    }
}

/// Risk level 1..=5 from stop distance relative to recent volatility.
pub fn risk_level(stop_distance_percent: f64, volatility_percent: Option<f64>) -> u8 {
    let Some(vol) = volatility_percent.filter(|v| *v > 0.0 && v.is_finite()) else {
        return 3;
    };
    let ratio = stop_distance_percent / vol;
    match ratio {
        r if r < 0.75 => 1,
        r if r < 1.5 => 2,
        r if r < 2.5 => 3,
        r if r < 4.0 => 4,
        _ => 5,
    }
}

/// Fixed-fractional quantity: risk a share of equity on the stop distance,
/// scaled down as risk rises, then cap by max position value and equity.
pub fn position_size(
    equity: f64,
    entry: f64,
    stop_distance: f64,
    risk_level: u8,
    risk: &RiskConfig,
) -> f64 {
    if equity <= 0.0 || entry <= 0.0 || stop_distance <= 0.0 {
        return 0.0;
    }
    let scale = f64::from(6 - risk_level.clamp(1, 5)) / 5.0;
    let at_risk = equity * risk.max_risk_percent / 100.0 * scale;
    let quantity = at_risk / stop_distance;
    quantity
        .min(risk.max_position_value / entry)
        .min(equity / entry)
        .max(0.0)
}

/// Produce one signal from `inputs`.
pub fn generate_signal(
    inputs: &SignalInputs<'_>,
    config: &SignalConfig,
    risk: &RiskConfig,
) -> Signal {
    let mut conditions = Vec::new();

    let Some(technical) = technical_score(inputs.frames, config, &mut conditions) else {
        return Signal::hold(
            inputs,
            vec!["insufficient history".to_string()],
            0.0,
            "indicators are still warming up".to_string(),
        );
    };

    let mut score = technical;
    let mut rationale = format!("technical score {technical:.3}");
    let advisory = inputs.advisory.filter(|a| {
        a.is_fresh(inputs.now, config.advisory_ttl())
            && a.record.confidence >= config.advisory_min_confidence
    });

    let confidence = match advisory {
        Some(a) => {
            let alignment = if score == 0.0 {
                0.0
            } else {
                a.record.trend.bias() * score.signum()
            };
            score = (score * (1.0 + a.record.confidence * alignment)).clamp(-1.0, 1.0);
            conditions.push(format!(
                "advisory {:?} (confidence {:.2})",
                a.record.trend, a.record.confidence
            ).to_lowercase());
            rationale.push_str(&format!(
                ", advisory alignment {alignment:+.0} at confidence {:.2}",
                a.record.confidence
            ));
            ((score.abs() + a.record.confidence) / 2.0).min(1.0)
        }
        None => {
            conditions.push("technical only".to_string());
            rationale.push_str(", no usable advisory");
            score.abs().min(1.0)
        }
    };
    rationale.push_str(&format!(", final score {score:.3} vs ±{:.2}", config.buy_threshold));

    let action = if score > config.buy_threshold {
        Action::Buy
    } else if score < -config.buy_threshold {
        Action::Sell
    } else {
        Action::Hold
    };
    let Some(direction) = action.direction() else {
        let mut signal = Signal::hold(inputs, conditions, score, rationale);
        signal.confidence = confidence;
        return signal;
    };

    let entry = inputs.last_close;
    let atr = inputs
        .frames
        .iter()
        .find(|(tf, _)| *tf == inputs.primary_timeframe)
        .and_then(|(_, set)| set.atr)
        .filter(|a| *a > 0.0);
    let fallback = entry * config.fallback_stop_percent / 100.0;
    let mut stop_distance = atr.map(|a| a * config.stop_atr_multiple).unwrap_or(fallback);
    if stop_distance >= entry {
        stop_distance = fallback;
    }

    let sign = direction.sign();
    let stop_loss = entry - sign * stop_distance;
    let take_profit = entry + sign * risk.risk_reward * stop_distance;
    let level = risk_level(
        stop_distance / entry * 100.0,
        inputs.recent_volatility_percent,
    );
    let size = position_size(inputs.equity, entry, stop_distance, level, risk);

    Signal {
        action,
        symbol: inputs.symbol.to_string(),
        entry_price: entry,
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        position_size: size,
        risk_level: level,
        time_frame: inputs.primary_timeframe,
        conditions,
        rationale,
        confidence,
        score,
        generated_at: inputs.now,
    }
}
