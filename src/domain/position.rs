//! Positions, closed trades and exit-trigger rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::candle::Candle;
use super::error::TradedeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TradedeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            other => Err(TradedeskError::invalid_order(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    SignalReversal,
    EndOfData,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Manual => "manual",
            CloseReason::SignalReversal => "signal_reversal",
            CloseReason::EndOfData => "end_of_data",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = TradedeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            "manual" => Ok(CloseReason::Manual),
            "signal_reversal" => Ok(CloseReason::SignalReversal),
            "end_of_data" => Ok(CloseReason::EndOfData),
            other => Err(TradedeskError::invalid_order(format!(
                "unknown close reason '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub entry_commission: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn is_short(&self) -> bool {
        self.direction == Direction::Short
    }

    /// quantity × entry_price
    pub fn entry_notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    /// quantity × price
    pub fn notional(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Cash the position would return if closed at `price`, before exit costs.
    ///
    /// Shorts escrow their entry notional, so they return it plus the price
    /// difference.
    pub fn settlement_value(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Long => self.quantity * price,
            Direction::Short => self.entry_notional() + self.unrealized_pnl(price),
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * self.quantity * (price - self.entry_price)
    }

    /// (price − entry) / entry × 100 × sign(direction)
    pub fn unrealized_pnl_percent(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0 * self.direction.sign()
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        match (self.stop_loss, self.direction) {
            (None, _) => false,
            (Some(stop), Direction::Long) => price <= stop,
            (Some(stop), Direction::Short) => price >= stop,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match (self.take_profit, self.direction) {
            (None, _) => false,
            (Some(target), Direction::Long) => price >= target,
            (Some(target), Direction::Short) => price <= target,
        }
    }

    /// Which exit, if any, `candle` triggers, and the fill price.
    ///
    /// The adverse extreme of the bar is checked first, so when both stop and
    /// target lie inside the range the stop wins. A bar that opens beyond a
    /// level fills at the open.
    pub fn exit_trigger(&self, candle: &Candle) -> Option<(CloseReason, f64)> {
        let (adverse, favourable) = match self.direction {
            Direction::Long => (candle.low, candle.high),
            Direction::Short => (candle.high, candle.low),
        };

        if self.should_stop_loss(adverse) {
            let stop = self.stop_loss?;
            let fill = if self.should_stop_loss(candle.open) {
                candle.open
            } else {
                stop
            };
            return Some((CloseReason::StopLoss, fill));
        }
        if self.should_take_profit(favourable) {
            let target = self.take_profit?;
            let fill = if self.should_take_profit(candle.open) {
                candle.open
            } else {
                target
            };
            return Some((CloseReason::TakeProfit, fill));
        }
        None
    }
}

/// What an edit does to one exit level.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LevelEdit {
    #[default]
    Keep,
    Set(f64),
    Clear,
}

impl LevelEdit {
    pub fn apply(self, current: Option<f64>) -> Option<f64> {
        match self {
            LevelEdit::Keep => current,
            LevelEdit::Set(level) => Some(level),
            LevelEdit::Clear => None,
        }
    }

    pub fn is_keep(self) -> bool {
        self == LevelEdit::Keep
    }
}

/// Check stop and target against each other and, when given, a reference price.
///
/// For a long the stop must sit below the reference and the target above it;
/// a short mirrors this.
pub fn validate_levels(
    direction: Direction,
    reference: Option<f64>,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> Result<(), TradedeskError> {
    for (name, level) in [("stop_loss", stop_loss), ("take_profit", take_profit)] {
        if let Some(v) = level {
            if !v.is_finite() || v <= 0.0 {
                return Err(TradedeskError::invalid_order(format!(
                    "{name} must be a positive finite price, got {v}"
                )));
            }
        }
    }

    let sign = direction.sign();
    if let (Some(stop), Some(target)) = (stop_loss, take_profit) {
        if (target - stop) * sign <= 0.0 {
            return Err(TradedeskError::invalid_order(format!(
                "{direction} take_profit {target} is on the wrong side of stop_loss {stop}"
            )));
        }
    }
    if let Some(reference) = reference {
        if let Some(stop) = stop_loss {
            if (reference - stop) * sign <= 0.0 {
                return Err(TradedeskError::invalid_order(format!(
                    "{direction} stop_loss {stop} is on the wrong side of entry {reference}"
                )));
            }
        }
        if let Some(target) = take_profit {
            if (target - reference) * sign <= 0.0 {
                return Err(TradedeskError::invalid_order(format!(
                    "{direction} take_profit {target} is on the wrong side of entry {reference}"
                )));
            }
        }
    }
    Ok(())
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub close_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Net of entry and exit commission.
    pub realized_pnl: f64,
    /// `realized_pnl` relative to the entry notional.
    pub realized_pnl_percent: f64,
    /// Entry plus exit commission.
    pub commission: f64,
    pub close_reason: CloseReason,
}

impl Trade {
    pub fn holding_period(&self) -> Duration {
        self.closed_at - self.opened_at
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn opened_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn sample_long_position() -> Position {
        Position {
            id: 1,
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            quantity: 2.0,
            entry_price: 100.0,
            stop_loss: Some(95.0),
            take_profit: Some(110.0),
            opened_at: opened_at(),
            status: PositionStatus::Open,
            entry_commission: 0.0,
        }
    }

    fn sample_short_position() -> Position {
        Position {
            id: 2,
            direction: Direction::Short,
            stop_loss: Some(105.0),
            take_profit: Some(90.0),
            ..sample_long_position()
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: opened_at() + Duration::hours(1),
            open,
            high,
            low,
            close,
            volume: 1.0,
            quote_volume: close,
        }
    }

    #[test]
    fn unrealized_pnl_long_and_short() {
        let long = sample_long_position();
        let short = sample_short_position();
        assert!((long.unrealized_pnl(105.0) - 10.0).abs() < f64::EPSILON);
        assert!((short.unrealized_pnl(105.0) + 10.0).abs() < f64::EPSILON);
        assert!((long.unrealized_pnl_percent(105.0) - 5.0).abs() < 1e-12);
        assert!((short.unrealized_pnl_percent(95.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn short_settlement_returns_escrow_plus_pnl() {
        let short = sample_short_position();
        assert!((short.settlement_value(90.0) - 220.0).abs() < 1e-12);
        assert!((short.settlement_value(100.0) - 200.0).abs() < 1e-12);
    }

    #[test]
    fn stop_loss_triggers() {
        let long = sample_long_position();
        assert!(long.should_stop_loss(95.0));
        assert!(long.should_stop_loss(90.0));
        assert!(!long.should_stop_loss(96.0));

        let short = sample_short_position();
        assert!(short.should_stop_loss(105.0));
        assert!(!short.should_stop_loss(104.0));
    }

    #[test]
    fn unset_levels_never_trigger() {
        let pos = Position {
            stop_loss: None,
            take_profit: None,
            ..sample_long_position()
        };
        assert!(!pos.should_stop_loss(0.01));
        assert!(!pos.should_take_profit(1e9));
        assert_eq!(pos.exit_trigger(&bar(100.0, 500.0, 1.0, 100.0)), None);
    }

    #[test]
    fn stop_wins_when_both_levels_inside_bar() {
        let pos = sample_long_position();
        let trigger = pos.exit_trigger(&bar(100.0, 112.0, 90.0, 100.0));
        assert_eq!(trigger, Some((CloseReason::StopLoss, 95.0)));
    }

    #[test]
    fn short_stop_wins_when_both_levels_inside_bar() {
        let pos = sample_short_position();
        let trigger = pos.exit_trigger(&bar(100.0, 106.0, 89.0, 100.0));
        assert_eq!(trigger, Some((CloseReason::StopLoss, 105.0)));
    }

    #[test]
    fn take_profit_fill() {
        let pos = sample_long_position();
        let trigger = pos.exit_trigger(&bar(101.0, 111.0, 99.0, 108.0));
        assert_eq!(trigger, Some((CloseReason::TakeProfit, 110.0)));
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let pos = sample_long_position();
        let trigger = pos.exit_trigger(&bar(92.0, 93.0, 91.0, 92.5));
        assert_eq!(trigger, Some((CloseReason::StopLoss, 92.0)));
    }

    #[test]
    fn gap_through_target_fills_at_open() {
        let pos = sample_short_position();
        let trigger = pos.exit_trigger(&bar(88.0, 89.0, 87.0, 88.0));
        assert_eq!(trigger, Some((CloseReason::TakeProfit, 88.0)));
    }

    #[test]
    fn validate_levels_long() {
        assert!(validate_levels(Direction::Long, Some(100.0), Some(95.0), Some(110.0)).is_ok());
        assert!(validate_levels(Direction::Long, Some(100.0), Some(101.0), None).is_err());
        assert!(validate_levels(Direction::Long, Some(100.0), None, Some(99.0)).is_err());
        assert!(validate_levels(Direction::Long, None, Some(105.0), Some(104.0)).is_err());
        assert!(validate_levels(Direction::Long, None, Some(-1.0), None).is_err());
        assert!(validate_levels(Direction::Long, None, None, Some(f64::NAN)).is_err());
    }

    #[test]
    fn validate_levels_short() {
        assert!(validate_levels(Direction::Short, Some(100.0), Some(105.0), Some(90.0)).is_ok());
        assert!(validate_levels(Direction::Short, Some(100.0), Some(95.0), None).is_err());
    }

    #[test]
    fn parse_direction_and_reason() {
        assert_eq!("buy".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("SHORT".parse::<Direction>().unwrap(), Direction::Short);
        assert!("sideways".parse::<Direction>().is_err());
        for reason in [
            CloseReason::StopLoss,
            CloseReason::TakeProfit,
            CloseReason::Manual,
            CloseReason::SignalReversal,
            CloseReason::EndOfData,
        ] {
            assert_eq!(reason.as_str().parse::<CloseReason>().unwrap(), reason);
        }
    }

    #[test]
    fn optional_levels_serialize_as_null() {
        let pos = Position {
            take_profit: None,
            ..sample_long_position()
        };
        let json = serde_json::to_value(&pos).unwrap();
        assert!(json["take_profit"].is_null());
        assert_eq!(json["direction"], "long");
    }
}
