#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use intratrader::domain::backtest::SimulationConfig;
pub use intratrader::domain::bar::Bar;
use intratrader::domain::error::IntratraderError;
use intratrader::domain::params::TradingParams;
use intratrader::domain::signal::{FeatureRow, PredictionInput, SmoothedSignal, TimedSignal};
use intratrader::ports::data_port::DataPort;

pub struct MockDataPort {
    pub bars: Vec<Bar>,
    pub predictions: PredictionInput,
    pub features: Vec<FeatureRow>,
    pub error: Option<String>,
}

impl MockDataPort {
    pub fn new(bars: Vec<Bar>, signals: Vec<TimedSignal>) -> Self {
        Self {
            bars,
            predictions: PredictionInput::Smoothed(signals),
            features: Vec::new(),
            error: None,
        }
    }

    pub fn with_predictions(mut self, predictions: PredictionInput) -> Self {
        self.predictions = predictions;
        self
    }

    pub fn with_features(mut self, features: Vec<FeatureRow>) -> Self {
        self.features = features;
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }

    fn check(&self) -> Result<(), IntratraderError> {
        match &self.error {
            Some(reason) => Err(IntratraderError::Database {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, from: NaiveDate) -> Result<Vec<Bar>, IntratraderError> {
        self.check()?;
        Ok(self.bars.iter().filter(|b| b.date() >= from).cloned().collect())
    }

    fn fetch_predictions(&self) -> Result<PredictionInput, IntratraderError> {
        self.check()?;
        Ok(self.predictions.clone())
    }

    fn fetch_features(&self) -> Result<Vec<FeatureRow>, IntratraderError> {
        self.check()?;
        Ok(self.features.clone())
    }

    fn bar_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, IntratraderError> {
        self.check()?;
        Ok(match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp, self.bars.len())),
            _ => None,
        })
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn ts(day: &str, h: u32, m: u32) -> NaiveDateTime {
    date(day).and_hms_opt(h, m, 0).unwrap()
}

/// One-minute bars for `count` minutes starting at `h:m`, closing at
/// `price(i)` for the i-th bar.
pub fn minute_bars(day: &str, h: u32, m: u32, count: usize, price: impl Fn(usize) -> f64) -> Vec<Bar> {
    let start = ts(day, h, m);
    (0..count)
        .map(|i| Bar::flat(start + Duration::minutes(i as i64), price(i)))
        .collect()
}

/// A full session, 09:15 to 15:29.
pub fn session_bars(day: &str, price: impl Fn(usize) -> f64) -> Vec<Bar> {
    minute_bars(day, 9, 15, 375, price)
}

pub fn signal(
    timestamp: NaiveDateTime,
    entry_long: f64,
    entry_short: f64,
    exit_long: f64,
    exit_short: f64,
) -> TimedSignal {
    TimedSignal {
        timestamp,
        signal: SmoothedSignal {
            entry_smoothed_long: entry_long,
            entry_smoothed_short: entry_short,
            exit_smoothed_long: exit_long,
            exit_smoothed_short: exit_short,
        },
    }
}

/// A quiet signal (nothing qualifies) for every bar, with `long` entry
/// confidence on the bars listed in `long_at`.
pub fn signals_for(bars: &[Bar], long_at: &[usize]) -> Vec<TimedSignal> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            let long = if long_at.contains(&i) { 0.9 } else { 0.1 };
            signal(b.timestamp, long, 0.1, long, 0.1)
        })
        .collect()
}

pub fn sim_config(start: &str, end: &str, params: TradingParams) -> SimulationConfig {
    SimulationConfig {
        start_date: date(start),
        end_date: date(end),
        params,
    }
}
