//! Write side of the series store and the closed-trade ledger.
//!
//! Batch writes never stop at the first bad row: each failure is recorded in
//! the returned [`BatchInsertReport`] and the remaining rows are still tried.

use chrono::{NaiveDate, NaiveDateTime};

use crate::domain::bar::Bar;
use crate::domain::error::IntratraderError;
use crate::domain::live::LiveState;
use crate::domain::position::ClosedPosition;
use crate::domain::signal::{FeatureRow, PredictionRow, TimedSignal};

#[derive(Debug, Clone, PartialEq)]
pub struct InsertFailure {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchInsertReport {
    pub attempted: usize,
    pub inserted: usize,
    pub failures: Vec<InsertFailure>,
}

impl BatchInsertReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, index: usize, timestamp: NaiveDateTime, reason: impl Into<String>) {
        self.failures.push(InsertFailure {
            index,
            timestamp,
            reason: reason.into(),
        });
    }
}

pub trait SeriesStorePort {
    fn insert_bars(&self, bars: &[Bar]) -> Result<BatchInsertReport, IntratraderError>;
    fn insert_raw_predictions(&self, rows: &[PredictionRow]) -> Result<BatchInsertReport, IntratraderError>;
    fn insert_smoothed_predictions(&self, rows: &[TimedSignal]) -> Result<BatchInsertReport, IntratraderError>;
    fn insert_features(&self, rows: &[FeatureRow]) -> Result<BatchInsertReport, IntratraderError>;
}

pub trait LedgerPort {
    fn record_trades(&self, trades: &[ClosedPosition]) -> Result<BatchInsertReport, IntratraderError>;
}

/// Persisted live-session state, so a restart resumes open positions and
/// the day's admission count.
pub trait LiveStatePort {
    /// Open positions plus the admission count recorded for `date`.
    fn load_live_state(&self, date: NaiveDate) -> Result<LiveState, IntratraderError>;
    /// Replace the stored open positions and the count for `state.date`.
    fn save_live_state(&self, state: &LiveState) -> Result<(), IntratraderError>;
}
