//! Position lifecycle: open positions and their closed records.
//!
//! A [`Position`] is consumed by [`Position::close`], so a closed record can
//! never be reopened or closed a second time.

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitReason {
    ForcedExit,
    FixedTp,
    FixedSl,
    ConfShortExit,
    ConfLongExit,
    FinalClose,
}

impl ExitReason {
    pub const ALL: [ExitReason; 6] = [
        ExitReason::ForcedExit,
        ExitReason::FixedTp,
        ExitReason::FixedSl,
        ExitReason::ConfShortExit,
        ExitReason::ConfLongExit,
        ExitReason::FinalClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ForcedExit => "forced_exit",
            ExitReason::FixedTp => "fixed_tp",
            ExitReason::FixedSl => "fixed_sl",
            ExitReason::ConfShortExit => "conf_short_exit",
            ExitReason::ConfLongExit => "conf_long_exit",
            ExitReason::FinalClose => "final_close",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExitReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| format!("unknown exit reason '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeResult {
    Win,
    Loss,
}

impl TradeResult {
    /// Breakeven counts as a loss.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            TradeResult::Win
        } else {
            TradeResult::Loss
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Win => "WIN",
            TradeResult::Loss => "LOSS",
        }
    }
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub entry_time: NaiveDateTime,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    /// Price-difference P&L in points, signed by direction.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price)
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        if self.is_long() {
            price >= self.take_profit
        } else {
            price <= self.take_profit
        }
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        if self.is_long() {
            price <= self.stop_loss
        } else {
            price >= self.stop_loss
        }
    }

    pub fn close(self, exit_time: NaiveDateTime, exit_price: f64, reason: ExitReason) -> ClosedPosition {
        let pnl = self.unrealized_pnl(exit_price);
        ClosedPosition {
            entry_time: self.entry_time,
            exit_time,
            direction: self.direction,
            confidence: self.confidence,
            entry_price: self.entry_price,
            exit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            pnl,
            result: TradeResult::from_pnl(pnl),
            exit_reason: reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pnl: f64,
    pub result: TradeResult,
    pub exit_reason: ExitReason,
}

impl ClosedPosition {
    pub fn is_win(&self) -> bool {
        self.result == TradeResult::Win
    }
}
