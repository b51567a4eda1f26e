//! Stop-loss / take-profit level calculation.
//!
//! Levels are fixed at entry. Two interchangeable strategies exist: constant
//! point offsets and volatility-scaled (ATR multiple) offsets.

use super::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

pub trait OffsetCalculator {
    /// Levels for a new position, or `None` when a required input (ATR) is
    /// unavailable for the entry bar.
    fn levels(&self, direction: Direction, entry_price: f64, atr: Option<f64>) -> Option<StopLevels>;

    fn requires_atr(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedPoints {
    pub profit_offset: f64,
    pub loss_offset: f64,
}

impl OffsetCalculator for FixedPoints {
    fn levels(&self, direction: Direction, entry_price: f64, _atr: Option<f64>) -> Option<StopLevels> {
        let sign = direction.sign();
        Some(StopLevels {
            stop_loss: entry_price - sign * self.loss_offset,
            take_profit: entry_price + sign * self.profit_offset,
        })
    }
}

/// stop = entry -/+ multiplier*atr, target = entry +/- multiplier*atr*reward_ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtrMultiple {
    pub multiplier: f64,
    pub reward_ratio: f64,
}

impl OffsetCalculator for AtrMultiple {
    fn levels(&self, direction: Direction, entry_price: f64, atr: Option<f64>) -> Option<StopLevels> {
        let atr = atr.filter(|a| a.is_finite() && *a > 0.0)?;
        let sign = direction.sign();
        let risk = self.multiplier * atr;
        Some(StopLevels {
            stop_loss: entry_price - sign * risk,
            take_profit: entry_price + sign * risk * self.reward_ratio,
        })
    }

    fn requires_atr(&self) -> bool {
        true
    }
}

/// Strategy chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OffsetStrategy {
    Fixed(FixedPoints),
    Atr(AtrMultiple),
}

impl OffsetStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            OffsetStrategy::Fixed(_) => "fixed",
            OffsetStrategy::Atr(_) => "atr",
        }
    }
}

impl Default for OffsetStrategy {
    fn default() -> Self {
        OffsetStrategy::Fixed(FixedPoints {
            profit_offset: 50.0,
            loss_offset: 160.0,
        })
    }
}

impl OffsetCalculator for OffsetStrategy {
    fn levels(&self, direction: Direction, entry_price: f64, atr: Option<f64>) -> Option<StopLevels> {
        match self {
            OffsetStrategy::Fixed(f) => f.levels(direction, entry_price, atr),
            OffsetStrategy::Atr(a) => a.levels(direction, entry_price, atr),
        }
    }

    fn requires_atr(&self) -> bool {
        match self {
            OffsetStrategy::Fixed(f) => f.requires_atr(),
            OffsetStrategy::Atr(a) => a.requires_atr(),
        }
    }
}
