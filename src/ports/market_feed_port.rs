//! Latest market state for the live session.

use crate::domain::bar::Bar;
use crate::domain::error::IntratraderError;
use crate::domain::signal::TimedSignal;

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub bar: Bar,
    /// Most recent smoothed signal, which may be older than `bar`.
    pub signal: Option<TimedSignal>,
    pub atr: Option<f64>,
}

pub trait MarketFeedPort {
    /// `Ok(None)` when no bar has been published yet.
    fn snapshot(&self) -> Result<Option<MarketSnapshot>, IntratraderError>;
}
