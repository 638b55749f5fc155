//! CSV candle files and trade export.
//!
//! One file per series, `{symbol}_{timeframe}.csv`, with a header row and
//! columns `open_time,open,high,low,close,volume[,quote_volume]`. `open_time`
//! may be RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or epoch
//! milliseconds. Rows are returned in file order so ordering problems reach
//! the backtester's continuity check instead of being hidden by a sort.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TradedeskError;
use crate::domain::position::Trade;
use crate::ports::data_port::DataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{symbol}_{timeframe}.csv"))
    }

    fn read_all(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, TradedeskError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| TradedeskError::Data {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut candles = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| TradedeskError::Data {
                reason: format!("{}: CSV parse error: {e}", path.display()),
            })?;
            // Header is line 1.
            let line = row + 2;
            let open_time = parse_time(field(&record, 0, "open_time", line)?).ok_or_else(|| {
                TradedeskError::Data {
                    reason: format!("line {line}: unrecognised open_time"),
                }
            })?;
            let volume = number(&record, 5, "volume", line)?;
            let quote_volume = match record.get(6).filter(|s| !s.is_empty()) {
                Some(_) => number(&record, 6, "quote_volume", line)?,
                None => 0.0,
            };
            candles.push(Candle {
                open_time,
                open: number(&record, 1, "open", line)?,
                high: number(&record, 2, "high", line)?,
                low: number(&record, 3, "low", line)?,
                close: number(&record, 4, "close", line)?,
                volume,
                quote_volume,
            });
        }
        Ok(candles)
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<&'r str, TradedeskError> {
    record.get(index).ok_or_else(|| TradedeskError::Data {
        reason: format!("line {line}: missing {name} column"),
    })
}

fn number(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<f64, TradedeskError> {
    field(record, index, name, line)?
        .parse()
        .map_err(|e| TradedeskError::Data {
            reason: format!("line {line}: invalid {name} value: {e}"),
        })
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

impl DataPort for CsvAdapter {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TradedeskError> {
        let candles = self
            .read_all(symbol, timeframe)?
            .into_iter()
            .filter(|c| c.open_time >= start && c.open_time <= end)
            .collect();
        Ok(candles)
    }

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, TradedeskError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| TradedeskError::Data {
            reason: format!(
                "failed to read directory {}: {e}",
                self.base_path.display()
            ),
        })?;

        let suffix = format!("_{timeframe}.csv");
        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TradedeskError::Data {
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradedeskError> {
        let candles = self.read_all(symbol, timeframe)?;
        let first = candles.iter().map(|c| c.open_time).min();
        let last = candles.iter().map(|c| c.open_time).max();
        Ok(first
            .zip(last)
            .map(|(first, last)| (first, last, candles.len())))
    }
}

/// Write closed trades as CSV with a header row.
pub fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<(), TradedeskError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| TradedeskError::Data {
        reason: format!("failed to create {}: {e}", path.display()),
    })?;
    writer
        .write_record([
            "position_id",
            "symbol",
            "direction",
            "quantity",
            "entry_price",
            "close_price",
            "opened_at",
            "closed_at",
            "holding_hours",
            "realized_pnl",
            "realized_pnl_percent",
            "commission",
            "close_reason",
        ])
        .map_err(|e| TradedeskError::Data {
            reason: format!("CSV write error: {e}"),
        })?;

    for t in trades {
        let holding_hours = t.holding_period().num_minutes() as f64 / 60.0;
        writer
            .write_record([
                t.position_id.to_string(),
                t.symbol.clone(),
                t.direction.to_string(),
                t.quantity.to_string(),
                format!("{:.8}", t.entry_price),
                format!("{:.8}", t.close_price),
                t.opened_at.to_rfc3339(),
                t.closed_at.to_rfc3339(),
                format!("{holding_hours:.2}"),
                format!("{:.8}", t.realized_pnl),
                format!("{:.4}", t.realized_pnl_percent),
                format!("{:.8}", t.commission),
                t.close_reason.to_string(),
            ])
            .map_err(|e| TradedeskError::Data {
                reason: format!("CSV write error: {e}"),
            })?;
    }
    writer.flush()?;
    Ok(())
}
