//! SQLite series store, trade ledger, live market feed and live-session
//! state.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text, so lexical order in
//! SQL is chronological order.

use crate::domain::bar::{parse_timestamp, Bar, TIMESTAMP_FORMAT};
use crate::domain::error::IntratraderError;
use crate::domain::live::LiveState;
use crate::domain::position::{ClosedPosition, Direction, Position};
use crate::domain::signal::{FeatureRow, PredictionInput, PredictionRow, SmoothedSignal, TimedSignal};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::market_feed_port::{MarketFeedPort, MarketSnapshot};
use crate::ports::store_port::{BatchInsertReport, LedgerPort, LiveStatePort, SeriesStorePort};
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

const BAR_COLUMNS: &str = "timestamp, open, high, low, close, volume, open_interest";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, IntratraderError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| IntratraderError::missing("sqlite", "path"))?;
        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        Self::open(Path::new(&db_path), pool_size)
    }

    pub fn open(path: &Path, pool_size: u32) -> Result<Self, IntratraderError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(pool_error)?;
        Ok(Self { pool })
    }

    /// Single-connection pool; every connection to `:memory:` is a fresh
    /// database.
    pub fn in_memory() -> Result<Self, IntratraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), IntratraderError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bars (
                timestamp TEXT PRIMARY KEY,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL DEFAULT 0,
                open_interest INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS predictions (
                timestamp TEXT PRIMARY KEY,
                direction TEXT,
                raw_long_conf REAL,
                raw_short_conf REAL,
                entry_smoothed_long REAL,
                entry_smoothed_short REAL,
                exit_smoothed_long REAL,
                exit_smoothed_short REAL
            );
            CREATE TABLE IF NOT EXISTS features (
                timestamp TEXT PRIMARY KEY,
                atr REAL
            );
            CREATE TABLE IF NOT EXISTS trade_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                pnl REAL NOT NULL,
                result TEXT NOT NULL,
                exit_reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trade_ledger_exit ON trade_ledger(exit_time);
            CREATE TABLE IF NOT EXISTS live_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_time TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence REAL NOT NULL,
                entry_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS live_daily_count (
                trade_date TEXT PRIMARY KEY,
                opened INTEGER NOT NULL
            );",
        )
        .map_err(query_error)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, IntratraderError> {
        self.pool.get().map_err(pool_error)
    }

    /// Run `insert` for each row inside one transaction. A failing row is
    /// recorded and skipped; the rest are still written.
    fn insert_each<T, F>(
        &self,
        rows: &[T],
        timestamp_of: impl Fn(&T) -> NaiveDateTime,
        mut insert: F,
    ) -> Result<BatchInsertReport, IntratraderError>
    where
        F: FnMut(&rusqlite::Transaction<'_>, &T) -> Result<(), String>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        let mut report = BatchInsertReport {
            attempted: rows.len(),
            ..Default::default()
        };
        for (index, row) in rows.iter().enumerate() {
            match insert(&tx, row) {
                Ok(()) => report.inserted += 1,
                Err(reason) => {
                    let timestamp = timestamp_of(row);
                    tracing::warn!(index, %timestamp, %reason, "row rejected");
                    report.record_failure(index, timestamp, reason);
                }
            }
        }
        tx.commit().map_err(query_error)?;
        Ok(report)
    }

    fn latest_bar(&self) -> Result<Option<Bar>, IntratraderError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {BAR_COLUMNS} FROM bars ORDER BY timestamp DESC LIMIT 1"),
            [],
            bar_from_row,
        )
        .optional()
        .map_err(query_error)
    }

    fn latest_signal(&self, at_or_before: NaiveDateTime) -> Result<Option<TimedSignal>, IntratraderError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT timestamp, entry_smoothed_long, entry_smoothed_short,
                    exit_smoothed_long, exit_smoothed_short
             FROM predictions
             WHERE timestamp <= ?1
               AND entry_smoothed_long IS NOT NULL AND entry_smoothed_short IS NOT NULL
               AND exit_smoothed_long IS NOT NULL AND exit_smoothed_short IS NOT NULL
             ORDER BY timestamp DESC LIMIT 1",
            params![at_or_before.format(TIMESTAMP_FORMAT).to_string()],
            |row| {
                Ok(TimedSignal {
                    timestamp: timestamp_column(row, 0)?,
                    signal: SmoothedSignal {
                        entry_smoothed_long: row.get(1)?,
                        entry_smoothed_short: row.get(2)?,
                        exit_smoothed_long: row.get(3)?,
                        exit_smoothed_short: row.get(4)?,
                    },
                })
            },
        )
        .optional()
        .map_err(query_error)
    }

    fn atr_at(&self, timestamp: NaiveDateTime) -> Result<Option<f64>, IntratraderError> {
        let conn = self.conn()?;
        let atr: Option<Option<f64>> = conn
            .query_row(
                "SELECT atr FROM features WHERE timestamp = ?1",
                params![timestamp.format(TIMESTAMP_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error)?;
        Ok(atr.flatten())
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(&self, from: NaiveDate) -> Result<Vec<Bar>, IntratraderError> {
        let conn = self.conn()?;
        let from_str = from.format("%Y-%m-%d 00:00:00").to_string();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BAR_COLUMNS} FROM bars WHERE timestamp >= ?1 ORDER BY timestamp ASC"
            ))
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![from_str], bar_from_row)
            .map_err(query_error)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_error)?);
        }
        Ok(bars)
    }

    /// Smoothed when every row carries all four smoothed columns, raw
    /// otherwise.
    fn fetch_predictions(&self) -> Result<PredictionInput, IntratraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, direction, raw_long_conf, raw_short_conf,
                        entry_smoothed_long, entry_smoothed_short,
                        exit_smoothed_long, exit_smoothed_short
                 FROM predictions ORDER BY timestamp ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredPrediction {
                    timestamp: timestamp_column(row, 0)?,
                    direction: row.get(1)?,
                    raw_long_conf: row.get(2)?,
                    raw_short_conf: row.get(3)?,
                    smoothed: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
                })
            })
            .map_err(query_error)?;

        let mut stored = Vec::new();
        for row in rows {
            stored.push(row.map_err(query_error)?);
        }

        if !stored.is_empty() && stored.iter().all(|p| p.smoothed.iter().all(Option::is_some)) {
            let signals = stored
                .iter()
                .map(|p| TimedSignal {
                    timestamp: p.timestamp,
                    signal: SmoothedSignal {
                        entry_smoothed_long: p.smoothed[0].unwrap_or_default(),
                        entry_smoothed_short: p.smoothed[1].unwrap_or_default(),
                        exit_smoothed_long: p.smoothed[2].unwrap_or_default(),
                        exit_smoothed_short: p.smoothed[3].unwrap_or_default(),
                    },
                })
                .collect();
            return Ok(PredictionInput::Smoothed(signals));
        }

        stored
            .into_iter()
            .map(StoredPrediction::into_raw)
            .collect::<Result<Vec<_>, _>>()
            .map(PredictionInput::Raw)
    }

    fn fetch_features(&self) -> Result<Vec<FeatureRow>, IntratraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT timestamp, atr FROM features ORDER BY timestamp ASC")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FeatureRow {
                    timestamp: timestamp_column(row, 0)?,
                    atr: row.get(1)?,
                })
            })
            .map_err(query_error)?;

        let mut features = Vec::new();
        for row in rows {
            features.push(row.map_err(query_error)?);
        }
        Ok(features)
    }

    fn bar_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, IntratraderError> {
        let conn = self.conn()?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row("SELECT MIN(timestamp), MAX(timestamp), COUNT(*) FROM bars", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(query_error)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let parse = |s: &str| {
                    parse_timestamp(s).ok_or_else(|| IntratraderError::Database {
                        reason: format!("stored timestamp '{s}' is malformed"),
                    })
                };
                Ok(Some((parse(&min_str)?, parse(&max_str)?, count as usize)))
            }
            _ => Ok(None),
        }
    }
}

impl SeriesStorePort for SqliteAdapter {
    /// Duplicate timestamps are rejected, not replaced.
    fn insert_bars(&self, bars: &[Bar]) -> Result<BatchInsertReport, IntratraderError> {
        self.insert_each(
            bars,
            |b| b.timestamp,
            |tx, bar| {
                if ![bar.open, bar.high, bar.low, bar.close].iter().all(|v| v.is_finite()) {
                    return Err("non-finite price".to_string());
                }
                tx.execute(
                    "INSERT INTO bars (timestamp, open, high, low, close, volume, open_interest)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        bar.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume,
                        bar.open_interest
                    ],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            },
        )
    }

    /// Re-importing a raw row clears any smoothed values stored for it.
    fn insert_raw_predictions(&self, rows: &[PredictionRow]) -> Result<BatchInsertReport, IntratraderError> {
        self.insert_each(
            rows,
            |r| r.timestamp,
            |tx, row| {
                let conf = row.confidence();
                if !(0.0..=1.0).contains(&conf) {
                    return Err(format!("confidence {conf} outside [0, 1]"));
                }
                tx.execute(
                    "INSERT INTO predictions (timestamp, direction, raw_long_conf, raw_short_conf)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(timestamp) DO UPDATE SET
                        direction = excluded.direction,
                        raw_long_conf = excluded.raw_long_conf,
                        raw_short_conf = excluded.raw_short_conf,
                        entry_smoothed_long = NULL,
                        entry_smoothed_short = NULL,
                        exit_smoothed_long = NULL,
                        exit_smoothed_short = NULL",
                    params![
                        row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                        row.direction.as_str(),
                        row.raw_long_conf,
                        row.raw_short_conf
                    ],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            },
        )
    }

    fn insert_smoothed_predictions(&self, rows: &[TimedSignal]) -> Result<BatchInsertReport, IntratraderError> {
        self.insert_each(
            rows,
            |r| r.timestamp,
            |tx, row| {
                let s = row.signal;
                tx.execute(
                    "INSERT INTO predictions (timestamp, entry_smoothed_long, entry_smoothed_short,
                                              exit_smoothed_long, exit_smoothed_short)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(timestamp) DO UPDATE SET
                        entry_smoothed_long = excluded.entry_smoothed_long,
                        entry_smoothed_short = excluded.entry_smoothed_short,
                        exit_smoothed_long = excluded.exit_smoothed_long,
                        exit_smoothed_short = excluded.exit_smoothed_short",
                    params![
                        row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                        s.entry_smoothed_long,
                        s.entry_smoothed_short,
                        s.exit_smoothed_long,
                        s.exit_smoothed_short
                    ],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            },
        )
    }

    fn insert_features(&self, rows: &[FeatureRow]) -> Result<BatchInsertReport, IntratraderError> {
        self.insert_each(
            rows,
            |r| r.timestamp,
            |tx, row| {
                tx.execute(
                    "INSERT INTO features (timestamp, atr) VALUES (?1, ?2)",
                    params![row.timestamp.format(TIMESTAMP_FORMAT).to_string(), row.atr],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            },
        )
    }
}

impl LedgerPort for SqliteAdapter {
    fn record_trades(&self, trades: &[ClosedPosition]) -> Result<BatchInsertReport, IntratraderError> {
        self.insert_each(
            trades,
            |t| t.exit_time,
            |tx, t| {
                tx.execute(
                    "INSERT INTO trade_ledger (entry_time, exit_time, direction, confidence,
                        entry_price, exit_price, stop_loss, take_profit, pnl, result, exit_reason)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        t.entry_time.format(TIMESTAMP_FORMAT).to_string(),
                        t.exit_time.format(TIMESTAMP_FORMAT).to_string(),
                        t.direction.as_str(),
                        t.confidence,
                        t.entry_price,
                        t.exit_price,
                        t.stop_loss,
                        t.take_profit,
                        t.pnl,
                        t.result.to_string(),
                        t.exit_reason.to_string()
                    ],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            },
        )
    }
}

impl MarketFeedPort for SqliteAdapter {
    fn snapshot(&self) -> Result<Option<MarketSnapshot>, IntratraderError> {
        let Some(bar) = self.latest_bar()? else {
            return Ok(None);
        };
        let signal = self.latest_signal(bar.timestamp)?;
        let atr = self.atr_at(bar.timestamp)?;
        Ok(Some(MarketSnapshot { bar, signal, atr }))
    }
}

impl LiveStatePort for SqliteAdapter {
    fn load_live_state(&self, date: NaiveDate) -> Result<LiveState, IntratraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entry_time, direction, confidence, entry_price, stop_loss, take_profit
                 FROM live_positions ORDER BY entry_time ASC, id ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    timestamp_column(row, 0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })
            .map_err(query_error)?;

        let mut open_positions = Vec::new();
        for row in rows {
            let (entry_time, direction, confidence, entry_price, stop_loss, take_profit) =
                row.map_err(query_error)?;
            let direction: Direction = direction.parse().map_err(|reason: String| IntratraderError::DataInvalid {
                series: "live_positions".to_string(),
                timestamp: entry_time,
                reason,
            })?;
            open_positions.push(Position {
                entry_time,
                direction,
                confidence,
                entry_price,
                stop_loss,
                take_profit,
            });
        }

        let opened: Option<i64> = conn
            .query_row(
                "SELECT opened FROM live_daily_count WHERE trade_date = ?1",
                params![date.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error)?;

        Ok(LiveState {
            date: Some(date),
            opened_today: opened.map_or(0, |n| n.max(0) as usize),
            open_positions,
        })
    }

    fn save_live_state(&self, state: &LiveState) -> Result<(), IntratraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        tx.execute("DELETE FROM live_positions", []).map_err(query_error)?;
        for p in &state.open_positions {
            tx.execute(
                "INSERT INTO live_positions (entry_time, direction, confidence, entry_price, stop_loss, take_profit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    p.entry_time.format(TIMESTAMP_FORMAT).to_string(),
                    p.direction.as_str(),
                    p.confidence,
                    p.entry_price,
                    p.stop_loss,
                    p.take_profit
                ],
            )
            .map_err(query_error)?;
        }
        if let Some(date) = state.date {
            tx.execute(
                "INSERT INTO live_daily_count (trade_date, opened) VALUES (?1, ?2)
                 ON CONFLICT(trade_date) DO UPDATE SET opened = excluded.opened",
                params![date.to_string(), state.opened_today as i64],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)?;
        tracing::debug!(open = state.open_positions.len(), opened_today = state.opened_today, "live state saved");
        Ok(())
    }
}

struct StoredPrediction {
    timestamp: NaiveDateTime,
    direction: Option<String>,
    raw_long_conf: Option<f64>,
    raw_short_conf: Option<f64>,
    smoothed: [Option<f64>; 4],
}

impl StoredPrediction {
    fn into_raw(self) -> Result<PredictionRow, IntratraderError> {
        let incomplete = || IntratraderError::DataInvalid {
            series: "predictions".into(),
            timestamp: self.timestamp,
            reason: "row has neither raw nor complete smoothed values".into(),
        };
        let (Some(direction), Some(raw_long_conf), Some(raw_short_conf)) =
            (self.direction.as_deref(), self.raw_long_conf, self.raw_short_conf)
        else {
            return Err(incomplete());
        };
        let direction: Direction = direction.parse().map_err(|reason: String| IntratraderError::DataInvalid {
            series: "predictions".into(),
            timestamp: self.timestamp,
            reason,
        })?;
        Ok(PredictionRow {
            timestamp: self.timestamp,
            direction,
            raw_long_conf,
            raw_short_conf,
        })
    }
}

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<Bar> {
    Ok(Bar {
        timestamp: timestamp_column(row, 0)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
        open_interest: row.get(6)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn pool_error(e: r2d2::Error) -> IntratraderError {
    IntratraderError::Database { reason: e.to_string() }
}

fn query_error(e: rusqlite::Error) -> IntratraderError {
    IntratraderError::DatabaseQuery { reason: e.to_string() }
}
