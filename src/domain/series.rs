//! Validated, timestamp-indexed input series for one simulation run.
//!
//! Every series must be strictly ascending by timestamp. Out-of-order or
//! duplicate rows are rejected with [`IntratraderError::DataOrdering`]
//! rather than sorted.

use chrono::{NaiveDate, NaiveDateTime};

use super::bar::Bar;
use super::error::IntratraderError;
use super::exit_policy::BarContext;
use super::params::TradingParams;
use super::signal::{
    FeatureRow, FeatureTable, PredictionInput, PredictionRow, SignalTable, SmoothedSignal,
    TimedSignal,
};
use super::smoothing::smooth_predictions;

#[derive(Debug, Clone)]
pub struct MarketData {
    bars: Vec<Bar>,
    signals: SignalTable,
    features: FeatureTable,
}

impl MarketData {
    pub fn new(
        bars: Vec<Bar>,
        signals: Vec<TimedSignal>,
        features: Vec<FeatureRow>,
    ) -> Result<Self, IntratraderError> {
        check_ascending("bars", bars.iter().map(|b| b.timestamp))?;
        for bar in &bars {
            if !bar.close.is_finite() {
                return Err(invalid_row("bars", bar.timestamp, "close price is not finite"));
            }
        }
        check_ascending("predictions", signals.iter().map(|s| s.timestamp))?;
        for s in &signals {
            check_signal(s)?;
        }
        check_ascending("features", features.iter().map(|f| f.timestamp))?;

        Ok(MarketData {
            signals: SignalTable::from_signals(&signals),
            features: FeatureTable::from_rows(&features),
            bars,
        })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// The contiguous run of bars whose timestamp falls on `date`.
    pub fn bars_for_day(&self, date: NaiveDate) -> &[Bar] {
        let start = self.bars.partition_point(|b| b.date() < date);
        let end = self.bars.partition_point(|b| b.date() <= date);
        &self.bars[start..end]
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn is_last_bar(&self, timestamp: NaiveDateTime) -> bool {
        self.bars.last().is_some_and(|b| b.timestamp == timestamp)
    }

    pub fn signal(&self, timestamp: NaiveDateTime) -> Option<&SmoothedSignal> {
        self.signals.get(timestamp)
    }

    pub fn atr(&self, timestamp: NaiveDateTime) -> Option<f64> {
        self.features.atr(timestamp)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn context<'a>(&'a self, bar: &Bar) -> BarContext<'a> {
        BarContext {
            timestamp: bar.timestamp,
            price: bar.close,
            signal: self.signal(bar.timestamp),
            atr: self.atr(bar.timestamp),
        }
    }
}

/// Validate a prediction series and, for raw input, run both smoothing
/// passes over the whole series.
pub fn prepare_signals(
    input: PredictionInput,
    params: &TradingParams,
) -> Result<Vec<TimedSignal>, IntratraderError> {
    match input {
        PredictionInput::Raw(rows) => {
            check_raw_predictions(&rows)?;
            Ok(smooth_predictions(
                &rows,
                &params.entry_smoothing,
                &params.exit_smoothing,
            ))
        }
        PredictionInput::Smoothed(signals) => {
            check_ascending("predictions", signals.iter().map(|s| s.timestamp))?;
            for s in &signals {
                check_signal(s)?;
            }
            Ok(signals)
        }
    }
}

pub fn check_raw_predictions(rows: &[PredictionRow]) -> Result<(), IntratraderError> {
    check_ascending("predictions", rows.iter().map(|r| r.timestamp))?;
    for row in rows {
        for value in [row.raw_long_conf, row.raw_short_conf] {
            if !unit_interval(value) {
                return Err(invalid_row(
                    "predictions",
                    row.timestamp,
                    format!("confidence {value} outside [0, 1]"),
                ));
            }
        }
    }
    Ok(())
}

pub fn check_ascending(
    series: &str,
    timestamps: impl IntoIterator<Item = NaiveDateTime>,
) -> Result<(), IntratraderError> {
    let mut previous: Option<NaiveDateTime> = None;
    for ts in timestamps {
        if let Some(prev) = previous {
            if ts <= prev {
                return Err(IntratraderError::DataOrdering {
                    series: series.to_string(),
                    timestamp: ts,
                    previous: prev,
                });
            }
        }
        previous = Some(ts);
    }
    Ok(())
}

fn check_signal(s: &TimedSignal) -> Result<(), IntratraderError> {
    let v = &s.signal;
    let all = [
        v.entry_smoothed_long,
        v.entry_smoothed_short,
        v.exit_smoothed_long,
        v.exit_smoothed_short,
    ];
    if all.iter().all(|x| unit_interval(*x)) {
        Ok(())
    } else {
        Err(invalid_row(
            "predictions",
            s.timestamp,
            "smoothed confidence outside [0, 1]",
        ))
    }
}

fn unit_interval(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn invalid_row(series: &str, timestamp: NaiveDateTime, reason: impl Into<String>) -> IntratraderError {
    IntratraderError::DataInvalid {
        series: series.to_string(),
        timestamp,
        reason: reason.into(),
    }
}
