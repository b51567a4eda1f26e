//! Series store port trait.

use crate::domain::bar::Bar;
use crate::domain::error::IntratraderError;
use crate::domain::signal::{FeatureRow, PredictionInput};
use chrono::{NaiveDate, NaiveDateTime};

pub trait DataPort {
    /// Bars on or after `from`, ascending. Bars after the simulated range
    /// are still returned; the last one closes straggling positions.
    fn fetch_bars(&self, from: NaiveDate) -> Result<Vec<Bar>, IntratraderError>;

    /// The whole prediction series, so that smoothing windows see the
    /// history before the simulated range.
    fn fetch_predictions(&self) -> Result<PredictionInput, IntratraderError>;

    fn fetch_features(&self) -> Result<Vec<FeatureRow>, IntratraderError>;

    /// First and last bar timestamp plus bar count, or `None` when empty.
    fn bar_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, IntratraderError>;
}
