//! Web server adapter.
//!
//! A JSON API over the live position desk, the exchange gateway and the
//! latest strategy evaluation. Handlers only read snapshots or go through
//! the desk's mutation path.

mod error;
mod handlers;

pub use error::{ok, status_from_error, Envelope, WebError};
pub use handlers::*;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tokio::sync::watch;

use crate::live::desk::PositionDesk;
use crate::live::runner::AnalysisBoard;
use crate::ports::exchange_port::ExchangeGateway;

pub struct AppState {
    pub desk: Arc<PositionDesk>,
    pub exchange: Arc<dyn ExchangeGateway>,
    pub analysis: watch::Receiver<Arc<AnalysisBoard>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/positions", get(handlers::list_positions))
        .route("/api/positions/{id}", put(handlers::edit_position))
        .route("/api/positions/{id}/close", post(handlers::close_position))
        .route("/api/portfolio", get(handlers::portfolio))
        .route("/api/trade_history", get(handlers::trade_history))
        .route("/api/market_analysis", get(handlers::market_analysis))
        .route("/api/place_order", post(handlers::place_order))
        .route("/api/balance", get(handlers::balance))
        .fallback(handlers::not_found)
        .with_state(Arc::new(state))
}
