//! The live engine: refreshes market data, marks positions, evaluates the
//! strategy and optionally routes its signals to the exchange.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::advisory::AdvisoryClient;
use super::desk::PositionDesk;
use super::scheduler::Ticker;
use super::LiveConfig;
use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TradedeskError;
use crate::domain::indicator::{compute_indicator_set, IndicatorSet};
use crate::domain::market_data::MarketDataStore;
use crate::domain::order::{OrderAck, OrderRequest, OrderSide, OrderType};
use crate::domain::position::{CloseReason, Direction};
use crate::domain::signal::{
    generate_signal, recent_volatility_percent, Action, Signal, SignalInputs, TimedAdvisory,
};
use crate::domain::strategy::StrategyParams;
use crate::ports::advisory_port::AdvisoryRequest;
use crate::ports::data_port::DataPort;
use crate::ports::exchange_port::ExchangeGateway;

/// Candles of the primary timeframe handed to the advisory service.
const ADVISORY_CANDLES: usize = 24;

/// Latest strategy evaluation for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct MarketAnalysis {
    pub symbol: String,
    pub last_price: f64,
    pub frames: Vec<(Timeframe, IndicatorSet)>,
    pub advisory: Option<TimedAdvisory>,
    pub signal: Signal,
    pub generated_at: DateTime<Utc>,
}

pub type AnalysisBoard = BTreeMap<String, MarketAnalysis>;

/// Forward `order` to the exchange and record filled buys as ledger longs.
///
/// Buys are checked against the ledger at the price they would fill at
/// before anything is sent. A fill the ledger still refuses is reversed and
/// reported as an error. Sells are forwarded only; the ledger is not touched.
pub fn execute_order(
    desk: &PositionDesk,
    exchange: &dyn ExchangeGateway,
    order: &OrderRequest,
    at: DateTime<Utc>,
) -> Result<OrderAck, TradedeskError> {
    if order.side == OrderSide::Buy {
        let market = exchange.last_price(&order.symbol).map_err(|_| {
            TradedeskError::invalid_order(format!("no market price for {}", order.symbol))
        })?;
        let reference = order.execution_price(market)?;
        desk.check_open(
            Direction::Long,
            order.quantity,
            reference,
            order.stop_loss,
            order.take_profit,
        )?;
    }
    let mut ack = exchange.place_order(order)?;
    if order.side != OrderSide::Buy {
        return Ok(ack);
    }

    match desk.open(
        &ack.symbol,
        Direction::Long,
        ack.quantity,
        ack.price,
        order.stop_loss,
        order.take_profit,
        at,
    ) {
        Ok(position) => {
            ack.position_id = Some(position.id);
            Ok(ack)
        }
        Err(e) => {
            log::error!("order #{} filled but refused by the ledger: {e}", ack.order_id);
            let reversal = OrderRequest {
                symbol: ack.symbol.clone(),
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                price: None,
                quantity: ack.quantity,
                stop_loss: None,
                take_profit: None,
            };
            if let Err(undo) = exchange.place_order(&reversal) {
                log::error!("reversing order #{} failed: {undo}", ack.order_id);
            }
            Err(e)
        }
    }
}

pub struct LiveEngine {
    config: LiveConfig,
    params: StrategyParams,
    desk: Arc<PositionDesk>,
    exchange: Arc<dyn ExchangeGateway>,
    data: Arc<dyn DataPort + Send + Sync>,
    advisory: AdvisoryClient,
    market: Mutex<MarketDataStore>,
    advisories: Mutex<HashMap<String, TimedAdvisory>>,
    analysis: watch::Sender<Arc<AnalysisBoard>>,
}

impl LiveEngine {
    pub fn new(
        config: LiveConfig,
        params: StrategyParams,
        desk: Arc<PositionDesk>,
        exchange: Arc<dyn ExchangeGateway>,
        data: Arc<dyn DataPort + Send + Sync>,
        advisory: AdvisoryClient,
    ) -> Self {
        let (analysis, _rx) = watch::channel(Arc::new(AnalysisBoard::new()));
        LiveEngine {
            config,
            params,
            desk,
            exchange,
            data,
            advisory,
            market: Mutex::new(MarketDataStore::new()),
            advisories: Mutex::new(HashMap::new()),
            analysis,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn desk(&self) -> &Arc<PositionDesk> {
        &self.desk
    }

    pub fn subscribe_analysis(&self) -> watch::Receiver<Arc<AnalysisBoard>> {
        self.analysis.subscribe()
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, TradedeskError> {
        mutex
            .lock()
            .map_err(|_| TradedeskError::external("live engine", format!("{what} lock poisoned")))
    }

    /// The trailing window ending at `now`, or at the end of the stored
    /// data when that is earlier.
    fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradedeskError> {
        let Some((_, last, _)) = self.data.data_range(symbol, timeframe)? else {
            return Ok(Vec::new());
        };
        let end = last.min(now);
        let span = i32::try_from(self.config.history_candles).unwrap_or(i32::MAX);
        let start = end - timeframe.duration() * span;
        self.data.fetch_candles(symbol, timeframe, start, end)
    }

    /// Pull new candles for every symbol and timeframe.
    ///
    /// New primary-timeframe bars update the exchange price and run exit
    /// checks on the desk. Each stored series keeps at most
    /// `history_candles` bars. Returns the number of candles appended.
    pub fn refresh_market(&self, now: DateTime<Utc>) -> usize {
        let mut total = 0;
        for symbol in &self.config.symbols {
            for &timeframe in &self.config.timeframes {
                match self.refresh_series(symbol, timeframe, now) {
                    Ok(n) => total += n,
                    Err(e) => log::warn!("[{symbol} {timeframe}] market refresh failed: {e}"),
                }
            }
        }
        total
    }

    fn refresh_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<usize, TradedeskError> {
        let candles = self.fetch_window(symbol, timeframe, now)?;
        let fresh: Vec<Candle> = {
            let mut market = Self::lock(&self.market, "market")?;
            let appended = market.append_newer(symbol, timeframe, candles);
            let stored = market.candles(symbol, timeframe);
            let fresh = stored[stored.len() - appended..].to_vec();
            market.retain_last(symbol, timeframe, self.config.history_candles);
            fresh
        };
        if timeframe != self.config.primary_timeframe || fresh.is_empty() {
            return Ok(fresh.len());
        }

        for candle in &fresh {
            self.desk.apply_candle(symbol, candle)?;
        }
        if let Some(last) = fresh.last() {
            self.exchange.record_price(symbol, last.close)?;
            log::debug!("[{symbol}] {} new bar(s), last close {:.4}", fresh.len(), last.close);
        }
        Ok(fresh.len())
    }

    /// Mark every symbol at the exchange's last price and run tick exits.
    pub fn check_positions(&self, now: DateTime<Utc>) {
        for symbol in &self.config.symbols {
            let price = match self.exchange.last_price(symbol) {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("[{symbol}] no price yet: {e}");
                    continue;
                }
            };
            if let Err(e) = self.desk.update_price(symbol, price, now) {
                log::warn!("[{symbol}] position check failed: {e}");
            }
        }
    }

    /// Inputs for one evaluation, read under the market lock.
    fn gather(&self, symbol: &str) -> Result<Option<Gathered>, TradedeskError> {
        let market = Self::lock(&self.market, "market")?;
        let primary = market.candles(symbol, self.config.primary_timeframe);
        let Some(last) = primary.last() else {
            return Ok(None);
        };

        let mut frames = Vec::new();
        for &timeframe in &self.config.timeframes {
            match compute_indicator_set(market.candles(symbol, timeframe), &self.params.indicators) {
                Ok(set) => frames.push((timeframe, set)),
                Err(e) => log::debug!("[{symbol} {timeframe}] {e}"),
            }
        }

        let lookback = self.params.signal.volatility_lookback + 1;
        let closes: Vec<f64> = primary[primary.len().saturating_sub(lookback)..]
            .iter()
            .map(|c| c.close)
            .collect();
        let recent = primary[primary.len().saturating_sub(ADVISORY_CANDLES)..].to_vec();

        Ok(Some(Gathered {
            last_close: last.close,
            frames,
            volatility: recent_volatility_percent(&closes),
            recent,
        }))
    }

    /// Evaluate every symbol once and publish the results.
    pub async fn run_strategy(&self, now: DateTime<Utc>) -> Result<Vec<Signal>, TradedeskError> {
        let mut signals = Vec::new();
        let mut board: AnalysisBoard = (**self.analysis.borrow()).clone();

        for symbol in &self.config.symbols {
            let Some(inputs) = self.gather(symbol)? else {
                log::debug!("[{symbol}] no market data yet");
                continue;
            };

            let advisory = self.refresh_advisory(symbol, &inputs, now).await?;
            let equity = self.desk.snapshot().summary.total_value;
            let signal = generate_signal(
                &SignalInputs {
                    symbol,
                    primary_timeframe: self.config.primary_timeframe,
                    frames: &inputs.frames,
                    last_close: inputs.last_close,
                    recent_volatility_percent: inputs.volatility,
                    equity,
                    advisory: advisory.as_ref(),
                    now,
                },
                &self.params.signal,
                &self.params.risk,
            );
            log::info!(
                "[{symbol}] {} at {:.4} (score {:.3}, risk {})",
                signal.action,
                signal.entry_price,
                signal.score,
                signal.risk_level
            );

            if self.config.auto_execute {
                self.act_on_signal(&signal, now);
            }

            board.insert(
                symbol.clone(),
                MarketAnalysis {
                    symbol: symbol.clone(),
                    last_price: inputs.last_close,
                    frames: inputs.frames,
                    advisory,
                    signal: signal.clone(),
                    generated_at: now,
                },
            );
            signals.push(signal);
        }

        self.analysis.send_replace(Arc::new(board));
        Ok(signals)
    }

    /// Fetch a new advisory, falling back to the last one received.
    ///
    /// The fallback may be stale; the signal generator ignores records
    /// older than its TTL.
    async fn refresh_advisory(
        &self,
        symbol: &str,
        inputs: &Gathered,
        now: DateTime<Utc>,
    ) -> Result<Option<TimedAdvisory>, TradedeskError> {
        if self.advisory.is_enabled() {
            let request = AdvisoryRequest {
                symbol: symbol.to_string(),
                last_price: inputs.last_close,
                frames: inputs.frames.clone(),
                recent_candles: inputs.recent.clone(),
            };
            match self.advisory.fetch(&request).await {
                Ok(record) => {
                    let timed = TimedAdvisory {
                        record,
                        received_at: now,
                    };
                    Self::lock(&self.advisories, "advisory")?.insert(symbol.to_string(), timed);
                }
                Err(e) => log::warn!("[{symbol}] advisory unavailable, technical-only: {e}"),
            }
        }
        Ok(Self::lock(&self.advisories, "advisory")?.get(symbol).cloned())
    }

    /// Buy when flat, sell existing longs on a sell signal.
    fn act_on_signal(&self, signal: &Signal, now: DateTime<Utc>) {
        let symbol = &signal.symbol;
        let holdings = match self.desk.holdings(symbol) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("[{symbol}] cannot read holdings: {e}");
                return;
            }
        };

        match signal.action {
            Action::Hold => {}
            Action::Buy => {
                if !holdings.is_empty() || signal.position_size <= 0.0 {
                    return;
                }
                let order = OrderRequest {
                    symbol: symbol.clone(),
                    side: OrderSide::Buy,
                    order_type: OrderType::Market,
                    price: None,
                    quantity: signal.position_size,
                    stop_loss: signal.stop_loss,
                    take_profit: signal.take_profit,
                };
                if let Err(e) = execute_order(&self.desk, self.exchange.as_ref(), &order, now) {
                    log::warn!("[{symbol}] buy rejected: {e}");
                }
            }
            Action::Sell => {
                for (id, direction, quantity) in holdings {
                    if direction != Direction::Long {
                        continue;
                    }
                    let order = OrderRequest {
                        symbol: symbol.clone(),
                        side: OrderSide::Sell,
                        order_type: OrderType::Market,
                        price: None,
                        quantity,
                        stop_loss: None,
                        take_profit: None,
                    };
                    let result = self.exchange.place_order(&order).and_then(|ack| {
                        self.desk
                            .close(id, CloseReason::SignalReversal, Some(ack.price), now)
                    });
                    if let Err(e) = result {
                        log::warn!("[{symbol}] closing #{id} on sell signal failed: {e}");
                    }
                }
            }
        }
    }

    /// Start the positions, market and strategy tickers.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let market = {
            let engine = Arc::clone(&self);
            Ticker::new("market", self.config.market_interval).spawn(shutdown.clone(), move || {
                let engine = Arc::clone(&engine);
                async move {
                    let result =
                        tokio::task::spawn_blocking(move || engine.refresh_market(Utc::now())).await;
                    if let Err(e) = result {
                        log::error!("market refresh task failed: {e}");
                    }
                }
            })
        };

        let positions = {
            let engine = Arc::clone(&self);
            Ticker::new("positions", self.config.positions_interval).spawn(
                shutdown.clone(),
                move || {
                    let engine = Arc::clone(&engine);
                    async move { engine.check_positions(Utc::now()) }
                },
            )
        };

        let strategy = {
            let engine = Arc::clone(&self);
            Ticker::new("strategy", self.config.strategy_interval).spawn(shutdown, move || {
                let engine = Arc::clone(&engine);
                async move {
                    if let Err(e) = engine.run_strategy(Utc::now()).await {
                        log::error!("strategy evaluation failed: {e}");
                    }
                }
            })
        };

        vec![market, positions, strategy]
    }
}

struct Gathered {
    last_close: f64,
    frames: Vec<(Timeframe, IndicatorSet)>,
    volatility: Option<f64>,
    recent: Vec<Candle>,
}
