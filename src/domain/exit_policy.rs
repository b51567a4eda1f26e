//! Exit rule chain.
//!
//! Rules run in a fixed priority order and the first one that fires decides
//! the close reason:
//! 1. forced end-of-day liquidation
//! 2. take-profit / stop-loss levels fixed at entry (TP checked first)
//! 3. confidence reversal on the opposite side's exit-lag signal
//!
//! Rule 3 is skipped for a bar that has no signal.

use chrono::NaiveDateTime;

use super::params::TradingParams;
use super::position::{Direction, ExitReason, Position};
use super::signal::SmoothedSignal;

/// Everything the policies may look at for one bar.
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub signal: Option<&'a SmoothedSignal>,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub price: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRule {
    ForcedEndOfDay,
    TakeProfitStopLoss,
    ConfidenceReversal,
}

/// Evaluation order.
pub const EXIT_RULES: [ExitRule; 3] = [
    ExitRule::ForcedEndOfDay,
    ExitRule::TakeProfitStopLoss,
    ExitRule::ConfidenceReversal,
];

impl ExitRule {
    pub fn check(&self, position: &Position, ctx: &BarContext<'_>, params: &TradingParams) -> Option<ExitReason> {
        match self {
            ExitRule::ForcedEndOfDay => params
                .is_forced_exit(ctx.timestamp.time())
                .then_some(ExitReason::ForcedExit),
            ExitRule::TakeProfitStopLoss => {
                if position.should_take_profit(ctx.price) {
                    Some(ExitReason::FixedTp)
                } else if position.should_stop_loss(ctx.price) {
                    Some(ExitReason::FixedSl)
                } else {
                    None
                }
            }
            ExitRule::ConfidenceReversal => {
                let signal = ctx.signal?;
                match position.direction {
                    Direction::Long if signal.exit_smoothed_short >= params.exit_short_threshold => {
                        Some(ExitReason::ConfShortExit)
                    }
                    Direction::Short if signal.exit_smoothed_long >= params.exit_long_threshold => {
                        Some(ExitReason::ConfLongExit)
                    }
                    _ => None,
                }
            }
        }
    }
}

/// Run the full chain for one position. Every rule closes at the bar price.
pub fn evaluate_exit(position: &Position, ctx: &BarContext<'_>, params: &TradingParams) -> Option<ExitDecision> {
    EXIT_RULES.iter().find_map(|rule| {
        rule.check(position, ctx, params).map(|reason| ExitDecision {
            price: ctx.price,
            reason,
        })
    })
}
