//! JSON API handlers.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::indicator::MacdValue;
use crate::domain::order::OrderRequest;
use crate::domain::position::{CloseReason, Direction, LevelEdit, Trade};
use crate::domain::signal::{AdvisoryRecord, Signal};
use crate::live::runner::{execute_order, MarketAnalysis};

use super::error::ok;
use super::{AppState, WebError};

pub async fn list_positions(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.desk.snapshot();
    ok(&snapshot.positions).into_response()
}

/// A given level replaces the current one; a `clear_*` flag removes it.
#[derive(Debug, Deserialize)]
pub struct EditPositionRequest {
    #[serde(default, alias = "stopLoss")]
    pub stop_loss: Option<f64>,
    #[serde(default, alias = "takeProfit")]
    pub take_profit: Option<f64>,
    #[serde(default, alias = "clearStopLoss")]
    pub clear_stop_loss: bool,
    #[serde(default, alias = "clearTakeProfit")]
    pub clear_take_profit: bool,
}

fn level_edit(name: &str, value: Option<f64>, clear: bool) -> Result<LevelEdit, WebError> {
    match (value, clear) {
        (Some(_), true) => Err(WebError::bad_request(format!(
            "{name} given together with clear_{name}"
        ))),
        (Some(level), false) => Ok(LevelEdit::Set(level)),
        (None, true) => Ok(LevelEdit::Clear),
        (None, false) => Ok(LevelEdit::Keep),
    }
}

pub async fn edit_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<EditPositionRequest>,
) -> Result<Response, WebError> {
    let stop = level_edit("stop_loss", req.stop_loss, req.clear_stop_loss)?;
    let target = level_edit("take_profit", req.take_profit, req.clear_take_profit)?;
    if stop.is_keep() && target.is_keep() {
        return Err(WebError::bad_request(
            "nothing to change: give or clear stop_loss or take_profit",
        ));
    }
    let position = state.desk.edit(id, stop, target)?;
    log::info!(
        "#{id} edited: stop {:?}, target {:?}",
        position.stop_loss,
        position.take_profit
    );
    Ok(ok(position).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ClosePositionRequest {
    /// Free-form note; the trade is always recorded as a manual close.
    #[serde(default)]
    pub reason: Option<String>,
    /// Close price; the last observed price when absent.
    #[serde(default)]
    pub price: Option<f64>,
}

pub async fn close_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Response, WebError> {
    let req: ClosePositionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ClosePositionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| WebError::bad_request(format!("invalid close request: {e}")))?
    };
    if let Some(price) = req.price {
        if !price.is_finite() || price <= 0.0 {
            return Err(WebError::bad_request(format!(
                "close price must be positive, got {price}"
            )));
        }
    }

    let trade = state
        .desk
        .close(id, CloseReason::Manual, req.price, Utc::now())?;
    log::info!(
        "#{id} closed manually at {:.4} ({})",
        trade.close_price,
        req.reason.as_deref().unwrap_or("no reason given")
    );
    Ok(ok(TradeRow::from(&trade)).into_response())
}

pub async fn portfolio(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.desk.snapshot();
    ok(&snapshot.summary).into_response()
}

#[derive(Debug, Serialize)]
pub struct TradeRow {
    pub position_id: u64,
    pub symbol: String,
    pub side: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub close_price: f64,
    pub realized_pnl: f64,
    pub realized_pnl_percent: f64,
    pub commission: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// e.g. `"2d 3h 15m"`.
    pub holding_period: String,
    pub holding_hours: f64,
    pub close_reason: CloseReason,
}

fn format_holding(minutes: i64) -> String {
    let (days, rest) = (minutes / 1440, minutes % 1440);
    let (hours, mins) = (rest / 60, rest % 60);
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        let minutes = t.holding_period().num_minutes().max(0);
        TradeRow {
            position_id: t.position_id,
            symbol: t.symbol.clone(),
            side: t.direction,
            quantity: t.quantity,
            entry_price: t.entry_price,
            close_price: t.close_price,
            realized_pnl: t.realized_pnl,
            realized_pnl_percent: t.realized_pnl_percent,
            commission: t.commission,
            opened_at: t.opened_at,
            closed_at: t.closed_at,
            holding_period: format_holding(minutes),
            holding_hours: minutes as f64 / 60.0,
            close_reason: t.close_reason,
        }
    }
}

/// Newest first.
pub async fn trade_history(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.desk.snapshot();
    let rows: Vec<TradeRow> = snapshot.trades.iter().rev().map(TradeRow::from).collect();
    ok(rows).into_response()
}

#[derive(Debug, Serialize)]
pub struct MarketData {
    pub price: f64,
    pub rsi: BTreeMap<String, f64>,
    pub macd: BTreeMap<String, MacdValue>,
    pub bollinger_position: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisView {
    #[serde(flatten)]
    pub record: AdvisoryRecord,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MarketAnalysisView {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub market_data: MarketData,
    /// `null` when no advisory has been received.
    pub analysis: Option<AnalysisView>,
    pub strategy: Signal,
}

impl From<&MarketAnalysis> for MarketAnalysisView {
    fn from(a: &MarketAnalysis) -> Self {
        let mut market_data = MarketData {
            price: a.last_price,
            rsi: BTreeMap::new(),
            macd: BTreeMap::new(),
            bollinger_position: BTreeMap::new(),
        };
        for (tf, set) in &a.frames {
            let key = tf.to_string();
            if let Some(rsi) = set.rsi {
                market_data.rsi.insert(key.clone(), rsi);
            }
            if let Some(macd) = set.macd {
                market_data.macd.insert(key.clone(), macd);
            }
            if let Some(pos) = set.bollinger_position_percent {
                market_data.bollinger_position.insert(key, pos);
            }
        }
        MarketAnalysisView {
            symbol: a.symbol.clone(),
            generated_at: a.generated_at,
            market_data,
            analysis: a.advisory.as_ref().map(|t| AnalysisView {
                record: t.record.clone(),
                received_at: t.received_at,
            }),
            strategy: a.signal.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub symbol: Option<String>,
}

/// All symbols, or one with `?symbol=`.
pub async fn market_analysis(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Response, WebError> {
    let board = state.analysis.borrow().clone();
    match query.symbol {
        Some(symbol) => {
            let analysis = board.get(&symbol).ok_or_else(|| {
                WebError::not_found(format!("no analysis for {symbol} yet"))
            })?;
            Ok(ok(MarketAnalysisView::from(analysis)).into_response())
        }
        None => {
            let views: Vec<MarketAnalysisView> =
                board.values().map(MarketAnalysisView::from).collect();
            Ok(ok(views).into_response())
        }
    }
}

pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(order): Json<OrderRequest>,
) -> Result<Response, WebError> {
    let ack = execute_order(&state.desk, state.exchange.as_ref(), &order, Utc::now())?;
    Ok(ok(ack).into_response())
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub btc_balance: f64,
    pub usdt_balance: f64,
}

pub async fn balance(State(state): State<Arc<AppState>>) -> Result<Response, WebError> {
    let balances = state.exchange.balances()?;
    Ok(ok(BalanceView {
        btc_balance: balances.base,
        usdt_balance: balances.quote,
    })
    .into_response())
}

pub async fn not_found() -> WebError {
    WebError::not_found("no such endpoint")
}
