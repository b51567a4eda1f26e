//! CSV file series adapter.
//!
//! Columns are located by header name, so extra columns are ignored and
//! column order is free. Rows are returned in file order; ordering is
//! validated by the domain, never repaired here.

use crate::domain::bar::{parse_timestamp, Bar, TIMESTAMP_FORMAT};
use crate::domain::error::IntratraderError;
use crate::domain::position::{ClosedPosition, Direction};
use crate::domain::signal::{FeatureRow, PredictionInput, PredictionRow, SmoothedSignal, TimedSignal};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SMOOTHED_COLUMNS: [&str; 4] = [
    "entry_smoothed_long",
    "entry_smoothed_short",
    "exit_smoothed_long",
    "exit_smoothed_short",
];

pub struct CsvAdapter {
    bars_path: PathBuf,
    predictions_path: PathBuf,
    features_path: Option<PathBuf>,
}

impl CsvAdapter {
    pub fn new(bars_path: PathBuf, predictions_path: PathBuf, features_path: Option<PathBuf>) -> Self {
        Self {
            bars_path,
            predictions_path,
            features_path,
        }
    }

    pub fn read_bars(path: &Path) -> Result<Vec<Bar>, IntratraderError> {
        let mut table = CsvTable::open(path)?;
        let ts_col = table.require("timestamp")?;
        let close_col = table.require("close")?;
        let open_col = table.column("open");
        let high_col = table.column("high");
        let low_col = table.column("low");
        let volume_col = table.column("volume");
        let oi_col = table.column("open_interest");

        let mut bars = Vec::new();
        for row in table.rows()? {
            let timestamp = row.timestamp(ts_col)?;
            let close = row.f64(close_col, "close")?;
            bars.push(Bar {
                timestamp,
                open: row.opt_f64(open_col, "open")?.unwrap_or(close),
                high: row.opt_f64(high_col, "high")?.unwrap_or(close),
                low: row.opt_f64(low_col, "low")?.unwrap_or(close),
                close,
                volume: row.opt_i64(volume_col, "volume")?.unwrap_or(0),
                open_interest: row.opt_i64(oi_col, "open_interest")?.unwrap_or(0),
            });
        }
        Ok(bars)
    }

    /// Detects the prediction form from the header: four smoothed columns,
    /// `direction` + `confidence`, or `raw_long_conf` + `raw_short_conf`.
    pub fn read_predictions(path: &Path) -> Result<PredictionInput, IntratraderError> {
        let mut table = CsvTable::open(path)?;
        let ts_col = table.require("timestamp")?;

        if SMOOTHED_COLUMNS.iter().all(|c| table.column(c).is_some()) {
            let cols: Vec<usize> = SMOOTHED_COLUMNS
                .iter()
                .map(|c| table.require(c))
                .collect::<Result<_, _>>()?;
            let mut signals = Vec::new();
            for row in table.rows()? {
                signals.push(TimedSignal {
                    timestamp: row.timestamp(ts_col)?,
                    signal: SmoothedSignal {
                        entry_smoothed_long: row.f64(cols[0], SMOOTHED_COLUMNS[0])?,
                        entry_smoothed_short: row.f64(cols[1], SMOOTHED_COLUMNS[1])?,
                        exit_smoothed_long: row.f64(cols[2], SMOOTHED_COLUMNS[2])?,
                        exit_smoothed_short: row.f64(cols[3], SMOOTHED_COLUMNS[3])?,
                    },
                });
            }
            return Ok(PredictionInput::Smoothed(signals));
        }

        if let (Some(dir_col), Some(conf_col)) = (table.column("direction"), table.column("confidence")) {
            let mut rows = Vec::new();
            for row in table.rows()? {
                let timestamp = row.timestamp(ts_col)?;
                let direction: Direction = row
                    .text(dir_col, "direction")?
                    .parse()
                    .map_err(|reason: String| IntratraderError::Data { reason })?;
                rows.push(PredictionRow::new(timestamp, direction, row.f64(conf_col, "confidence")?));
            }
            return Ok(PredictionInput::Raw(rows));
        }

        if let (Some(long_col), Some(short_col)) = (table.column("raw_long_conf"), table.column("raw_short_conf")) {
            let mut rows = Vec::new();
            for row in table.rows()? {
                let long = row.f64(long_col, "raw_long_conf")?;
                let short = row.f64(short_col, "raw_short_conf")?;
                rows.push(PredictionRow {
                    timestamp: row.timestamp(ts_col)?,
                    direction: if long >= short { Direction::Long } else { Direction::Short },
                    raw_long_conf: long,
                    raw_short_conf: short,
                });
            }
            return Ok(PredictionInput::Raw(rows));
        }

        Err(IntratraderError::Data {
            reason: format!(
                "{}: unrecognised prediction header, expected smoothed columns, direction/confidence or raw_long_conf/raw_short_conf",
                path.display()
            ),
        })
    }

    /// Only `atr` is read; an empty cell means no ATR for that row.
    pub fn read_features(path: &Path) -> Result<Vec<FeatureRow>, IntratraderError> {
        let mut table = CsvTable::open(path)?;
        let ts_col = table.require("timestamp")?;
        let atr_col = table.column("atr");
        let mut rows = Vec::new();
        for row in table.rows()? {
            rows.push(FeatureRow {
                timestamp: row.timestamp(ts_col)?,
                atr: row.opt_f64(atr_col, "atr")?,
            });
        }
        Ok(rows)
    }

    pub fn write_smoothed_predictions(path: &Path, signals: &[TimedSignal]) -> Result<(), IntratraderError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| write_error(path, e))?;
        for s in signals {
            wtr.serialize(SmoothedRecord::from(s))
                .map_err(|e| write_error(path, e))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_trades(path: &Path, trades: &[ClosedPosition]) -> Result<(), IntratraderError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| write_error(path, e))?;
        if trades.is_empty() {
            wtr.write_record(TRADE_COLUMNS).map_err(|e| write_error(path, e))?;
        }
        for t in trades {
            wtr.serialize(TradeRecord::from(t))
                .map_err(|e| write_error(path, e))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

const TRADE_COLUMNS: [&str; 11] = [
    "entry_time",
    "exit_time",
    "direction",
    "confidence",
    "entry_price",
    "exit_price",
    "stop_loss",
    "take_profit",
    "pnl",
    "result",
    "exit_reason",
];

/// One row of the trade list export; field order is the column order.
#[derive(Debug, Serialize)]
struct TradeRecord {
    entry_time: String,
    exit_time: String,
    direction: &'static str,
    confidence: String,
    entry_price: f64,
    exit_price: f64,
    stop_loss: f64,
    take_profit: f64,
    pnl: f64,
    result: &'static str,
    exit_reason: &'static str,
}

impl From<&ClosedPosition> for TradeRecord {
    fn from(t: &ClosedPosition) -> Self {
        TradeRecord {
            entry_time: t.entry_time.format(TIMESTAMP_FORMAT).to_string(),
            exit_time: t.exit_time.format(TIMESTAMP_FORMAT).to_string(),
            direction: t.direction.as_str(),
            confidence: format!("{:.4}", t.confidence),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            stop_loss: t.stop_loss,
            take_profit: t.take_profit,
            pnl: t.pnl,
            result: t.result.as_str(),
            exit_reason: t.exit_reason.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SmoothedRecord {
    timestamp: String,
    entry_smoothed_long: f64,
    entry_smoothed_short: f64,
    exit_smoothed_long: f64,
    exit_smoothed_short: f64,
}

impl From<&TimedSignal> for SmoothedRecord {
    fn from(s: &TimedSignal) -> Self {
        SmoothedRecord {
            timestamp: s.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            entry_smoothed_long: s.signal.entry_smoothed_long,
            entry_smoothed_short: s.signal.entry_smoothed_short,
            exit_smoothed_long: s.signal.exit_smoothed_long,
            exit_smoothed_short: s.signal.exit_smoothed_short,
        }
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, from: NaiveDate) -> Result<Vec<Bar>, IntratraderError> {
        let mut bars = Self::read_bars(&self.bars_path)?;
        bars.retain(|b| b.date() >= from);
        Ok(bars)
    }

    fn fetch_predictions(&self) -> Result<PredictionInput, IntratraderError> {
        Self::read_predictions(&self.predictions_path)
    }

    fn fetch_features(&self) -> Result<Vec<FeatureRow>, IntratraderError> {
        match &self.features_path {
            Some(path) => Self::read_features(path),
            None => Ok(Vec::new()),
        }
    }

    fn bar_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, IntratraderError> {
        let bars = Self::read_bars(&self.bars_path)?;
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp, bars.len())),
            _ => None,
        })
    }
}

fn write_error(path: &Path, e: csv::Error) -> IntratraderError {
    IntratraderError::Data {
        reason: format!("failed to write {}: {}", path.display(), e),
    }
}

struct CsvTable {
    path: PathBuf,
    reader: csv::Reader<std::fs::File>,
    columns: HashMap<String, usize>,
}

impl CsvTable {
    fn open(path: &Path) -> Result<Self, IntratraderError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| IntratraderError::Data {
                reason: format!("failed to read {}: {}", path.display(), e),
            })?;
        let columns = reader
            .headers()
            .map_err(|e| IntratraderError::Data {
                reason: format!("{}: bad header: {}", path.display(), e),
            })?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            columns,
        })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<usize, IntratraderError> {
        self.column(name).ok_or_else(|| IntratraderError::Data {
            reason: format!("{}: missing {} column", self.path.display(), name),
        })
    }

    fn rows(&mut self) -> Result<Vec<CsvRow>, IntratraderError> {
        let mut rows = Vec::new();
        for (i, result) in self.reader.records().enumerate() {
            let record = result.map_err(|e| IntratraderError::Data {
                reason: format!("{}: CSV parse error: {}", self.path.display(), e),
            })?;
            rows.push(CsvRow {
                line: i + 2,
                path: self.path.clone(),
                record,
            });
        }
        Ok(rows)
    }
}

struct CsvRow {
    line: usize,
    path: PathBuf,
    record: csv::StringRecord,
}

impl CsvRow {
    fn error(&self, reason: String) -> IntratraderError {
        IntratraderError::Data {
            reason: format!("{} line {}: {}", self.path.display(), self.line, reason),
        }
    }

    fn text(&self, col: usize, name: &str) -> Result<&str, IntratraderError> {
        match self.record.get(col) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(self.error(format!("missing {name} value"))),
        }
    }

    fn timestamp(&self, col: usize) -> Result<NaiveDateTime, IntratraderError> {
        let raw = self.text(col, "timestamp")?;
        parse_timestamp(raw).ok_or_else(|| self.error(format!("invalid timestamp '{raw}'")))
    }

    fn f64(&self, col: usize, name: &str) -> Result<f64, IntratraderError> {
        let raw = self.text(col, name)?;
        raw.parse()
            .map_err(|e| self.error(format!("invalid {name} value '{raw}': {e}")))
    }

    fn opt_f64(&self, col: Option<usize>, name: &str) -> Result<Option<f64>, IntratraderError> {
        match col.and_then(|c| self.record.get(c)).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| self.error(format!("invalid {name} value '{raw}': {e}"))),
        }
    }

    fn opt_i64(&self, col: Option<usize>, name: &str) -> Result<Option<i64>, IntratraderError> {
        match col.and_then(|c| self.record.get(c)).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => {
                if let Ok(v) = raw.parse::<i64>() {
                    return Ok(Some(v));
                }
                // pandas exports integer columns with a trailing ".0"
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0)
                    .map(|v| Some(v as i64))
                    .ok_or_else(|| self.error(format!("invalid {name} value '{raw}'")))
            }
        }
    }
}
