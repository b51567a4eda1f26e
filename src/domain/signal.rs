//! Model predictions and their smoothed confidence signals.
//!
//! Lookups by timestamp return `Option`: a bar with no matching prediction
//! or feature row simply has no signal for that bar.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::position::Direction;

/// One raw model output. Only the predicted side carries confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub raw_long_conf: f64,
    pub raw_short_conf: f64,
}

impl PredictionRow {
    pub fn new(timestamp: NaiveDateTime, direction: Direction, confidence: f64) -> Self {
        let (raw_long_conf, raw_short_conf) = match direction {
            Direction::Long => (confidence, 0.0),
            Direction::Short => (0.0, confidence),
        };
        PredictionRow {
            timestamp,
            direction,
            raw_long_conf,
            raw_short_conf,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self.direction {
            Direction::Long => self.raw_long_conf,
            Direction::Short => self.raw_short_conf,
        }
    }
}

/// Entry-lag and exit-lag smoothed confidences for one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SmoothedSignal {
    pub entry_smoothed_long: f64,
    pub entry_smoothed_short: f64,
    pub exit_smoothed_long: f64,
    pub exit_smoothed_short: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSignal {
    pub timestamp: NaiveDateTime,
    pub signal: SmoothedSignal,
}

/// Prediction series as delivered by a data store: raw model output that
/// still needs smoothing, or rows that were smoothed upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionInput {
    Raw(Vec<PredictionRow>),
    Smoothed(Vec<TimedSignal>),
}

impl PredictionInput {
    pub fn len(&self) -> usize {
        match self {
            PredictionInput::Raw(rows) => rows.len(),
            PredictionInput::Smoothed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        match self {
            PredictionInput::Raw(rows) => rows.iter().map(|r| r.timestamp).collect(),
            PredictionInput::Smoothed(rows) => rows.iter().map(|r| r.timestamp).collect(),
        }
    }
}

/// Feature row; only `atr` is consulted by the trading logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub timestamp: NaiveDateTime,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    index: HashMap<NaiveDateTime, SmoothedSignal>,
}

impl SignalTable {
    pub fn from_signals(signals: &[TimedSignal]) -> Self {
        let index = signals.iter().map(|s| (s.timestamp, s.signal)).collect();
        SignalTable { index }
    }

    pub fn get(&self, timestamp: NaiveDateTime) -> Option<&SmoothedSignal> {
        self.index.get(&timestamp)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    atr: HashMap<NaiveDateTime, f64>,
}

impl FeatureTable {
    pub fn from_rows(rows: &[FeatureRow]) -> Self {
        let atr = rows
            .iter()
            .filter_map(|r| r.atr.map(|v| (r.timestamp, v)))
            .collect();
        FeatureTable { atr }
    }

    pub fn atr(&self, timestamp: NaiveDateTime) -> Option<f64> {
        self.atr.get(&timestamp).copied()
    }
}
