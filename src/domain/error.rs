//! Domain error types.

use chrono::{DateTime, Utc};

/// Why a candle was rejected or flagged while replaying a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// `open_time` did not advance past the previous candle.
    OutOfOrder,
    /// One or more whole intervals are missing before this candle.
    Missing { intervals: i64 },
    /// high/low do not bracket open/close.
    InvalidPrices,
}

impl std::fmt::Display for GapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapKind::OutOfOrder => write!(f, "out-of-order candle"),
            GapKind::Missing { intervals } => write!(f, "{intervals} missing interval(s)"),
            GapKind::InvalidPrices => write!(f, "inconsistent OHLC prices"),
        }
    }
}

/// Top-level error type for tradedesk.
#[derive(Debug, thiserror::Error)]
pub enum TradedeskError {
    #[error("data gap in {symbol} at {at}: {kind}")]
    DataGap {
        symbol: String,
        at: DateTime<Utc>,
        kind: GapKind,
    },

    #[error("insufficient history: have {have} candles, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("invalid parameter range for {name}: {reason}")]
    InvalidParameterRange { name: String, reason: String },

    #[error("{service} unavailable: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("position {id} not found or already closed")]
    PositionNotFound { id: u64 },

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("insufficient capital: need {required:.2}, have {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradedeskError {
    pub fn external(service: &str, reason: impl Into<String>) -> Self {
        TradedeskError::ExternalService {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        TradedeskError::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub fn invalid_range(name: &str, reason: impl Into<String>) -> Self {
        TradedeskError::InvalidParameterRange {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TradedeskError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&TradedeskError> for std::process::ExitCode {
    fn from(err: &TradedeskError) -> Self {
        let code: u8 = match err {
            TradedeskError::Io(_) => 1,
            TradedeskError::ConfigParse { .. }
            | TradedeskError::ConfigMissing { .. }
            | TradedeskError::ConfigInvalid { .. }
            | TradedeskError::InvalidParameterRange { .. } => 2,
            TradedeskError::Data { .. }
            | TradedeskError::DataGap { .. }
            | TradedeskError::InsufficientHistory { .. } => 3,
            TradedeskError::PositionNotFound { .. }
            | TradedeskError::InvalidOrder { .. }
            | TradedeskError::InsufficientCapital { .. } => 4,
            TradedeskError::ExternalService { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
