//! Per-bar entry gate.
//!
//! Order of checks: entry window, concurrent cap, daily cap, signal
//! presence, thresholds (LONG before SHORT), then stop levels. A skip is a
//! normal outcome, never an error.

use super::exit_policy::BarContext;
use super::offsets::{OffsetCalculator, StopLevels};
use super::params::TradingParams;
use super::position::{Direction, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    OutsideWindow,
    ConcurrentCap,
    DailyCap,
    MissingSignal,
    BelowThreshold,
    MissingAtr,
    FinalBar,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::OutsideWindow => "outside_window",
            SkipReason::ConcurrentCap => "concurrent_cap",
            SkipReason::DailyCap => "daily_cap",
            SkipReason::MissingSignal => "missing_signal",
            SkipReason::BelowThreshold => "below_threshold",
            SkipReason::MissingAtr => "missing_atr",
            SkipReason::FinalBar => "final_bar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryDecision {
    Open {
        direction: Direction,
        confidence: f64,
        levels: StopLevels,
    },
    Skip(SkipReason),
}

impl EntryDecision {
    /// Materialize an `Open` decision at the given fill price. Levels are
    /// re-derived from `fill_price` so a broker fill away from the bar price
    /// keeps the configured offsets.
    pub fn into_position(self, ctx: &BarContext<'_>, fill_price: f64, params: &TradingParams) -> Option<Position> {
        match self {
            EntryDecision::Open {
                direction,
                confidence,
                levels,
            } => {
                let levels = if fill_price == ctx.price {
                    levels
                } else {
                    params.offsets.levels(direction, fill_price, ctx.atr)?
                };
                Some(Position {
                    entry_time: ctx.timestamp,
                    direction,
                    confidence,
                    entry_price: fill_price,
                    stop_loss: levels.stop_loss,
                    take_profit: levels.take_profit,
                })
            }
            EntryDecision::Skip(_) => None,
        }
    }
}

/// Capacity counters as seen after all exits for the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryGate {
    pub open_positions: usize,
    pub opened_today: usize,
}

pub fn evaluate_entry(ctx: &BarContext<'_>, gate: EntryGate, params: &TradingParams) -> EntryDecision {
    if !params.in_entry_window(ctx.timestamp.time()) {
        return EntryDecision::Skip(SkipReason::OutsideWindow);
    }
    if gate.open_positions >= params.max_concurrent_positions {
        return EntryDecision::Skip(SkipReason::ConcurrentCap);
    }
    if gate.opened_today >= params.max_daily_positions {
        return EntryDecision::Skip(SkipReason::DailyCap);
    }
    let Some(signal) = ctx.signal else {
        return EntryDecision::Skip(SkipReason::MissingSignal);
    };

    let (direction, confidence) = if signal.entry_smoothed_long >= params.long_threshold {
        (Direction::Long, signal.entry_smoothed_long)
    } else if signal.entry_smoothed_short >= params.short_threshold {
        (Direction::Short, signal.entry_smoothed_short)
    } else {
        return EntryDecision::Skip(SkipReason::BelowThreshold);
    };

    match params.offsets.levels(direction, ctx.price, ctx.atr) {
        Some(levels) => EntryDecision::Open {
            direction,
            confidence,
            levels,
        },
        None => EntryDecision::Skip(SkipReason::MissingAtr),
    }
}
