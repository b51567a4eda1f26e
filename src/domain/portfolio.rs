//! Open position set, closed list and per-day admission counter.

use chrono::{NaiveDate, NaiveDateTime};

use super::exit_policy::{BarContext, EXIT_RULES};
use super::params::TradingParams;
use super::position::{ClosedPosition, ExitReason, Position};

/// Positions move from `open` to `closed` exactly once and are never
/// touched again after that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Portfolio {
    open: Vec<Position>,
    closed: Vec<ClosedPosition>,
}

impl Portfolio {
    pub fn new() -> Self {
        Portfolio::default()
    }

    pub fn open_position(&mut self, position: Position) {
        self.open.push(position);
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed
    }

    /// Run the exit chain against every open position for one bar.
    ///
    /// Each rule is applied as a pass over the positions still open, so a
    /// position closed by an earlier rule is never seen by a later one.
    /// Returns the number of positions closed.
    pub fn apply_exits(&mut self, ctx: &BarContext<'_>, params: &TradingParams) -> usize {
        let before = self.closed.len();
        for rule in EXIT_RULES {
            if self.open.is_empty() {
                break;
            }
            let mut still_open = Vec::with_capacity(self.open.len());
            for position in std::mem::take(&mut self.open) {
                match rule.check(&position, ctx, params) {
                    Some(reason) => {
                        tracing::debug!(
                            entry = %position.entry_time,
                            exit = %ctx.timestamp,
                            direction = %position.direction,
                            price = ctx.price,
                            reason = %reason,
                            "position closed"
                        );
                        self.closed.push(position.close(ctx.timestamp, ctx.price, reason));
                    }
                    None => still_open.push(position),
                }
            }
            self.open = still_open;
        }
        self.closed.len() - before
    }

    /// Close everything still open at one price with one reason.
    pub fn close_all(&mut self, timestamp: NaiveDateTime, price: f64, reason: ExitReason) -> usize {
        let count = self.open.len();
        for position in std::mem::take(&mut self.open) {
            self.closed.push(position.close(timestamp, price, reason));
        }
        count
    }

    /// Close each open position for which `decide` yields an exit price and
    /// reason; the rest stay open.
    pub fn close_with<F>(&mut self, timestamp: NaiveDateTime, mut decide: F) -> usize
    where
        F: FnMut(&Position) -> Option<(f64, ExitReason)>,
    {
        let before = self.closed.len();
        let mut still_open = Vec::with_capacity(self.open.len());
        for position in std::mem::take(&mut self.open) {
            match decide(&position) {
                Some((price, reason)) => self.closed.push(position.close(timestamp, price, reason)),
                None => still_open.push(position),
            }
        }
        self.open = still_open;
        self.closed.len() - before
    }

    pub fn into_closed(self) -> Vec<ClosedPosition> {
        self.closed
    }
}

/// Positions opened on the current trading day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyState {
    pub date: Option<NaiveDate>,
    pub opened: usize,
}

impl DailyState {
    /// Reset the counter when `date` differs from the tracked day.
    pub fn roll(&mut self, date: NaiveDate) {
        if self.date != Some(date) {
            self.date = Some(date);
            self.opened = 0;
        }
    }

    pub fn record_open(&mut self) {
        self.opened += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Direction;
    use crate::domain::signal::SmoothedSignal;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn position(direction: Direction, entry_price: f64, minute: u32) -> Position {
        let sign = direction.sign();
        Position {
            entry_time: ts(9, minute),
            direction,
            confidence: 0.9,
            entry_price,
            stop_loss: entry_price - sign * 160.0,
            take_profit: entry_price + sign * 50.0,
        }
    }

    #[test]
    fn apply_exits_closes_each_position_once_with_first_matching_reason() {
        let params = TradingParams::default();
        let mut book = Portfolio::new();
        // hits TP at 1050
        book.open_position(position(Direction::Long, 1000.0, 20));
        // short reversal only
        book.open_position(position(Direction::Short, 1040.0, 21));
        // untouched long far from levels
        book.open_position(position(Direction::Long, 1045.0, 22));

        let signal = SmoothedSignal {
            exit_smoothed_long: 0.6,
            ..Default::default()
        };
        let ctx = BarContext {
            timestamp: ts(10, 0),
            price: 1050.0,
            signal: Some(&signal),
            atr: None,
        };
        let closed = book.apply_exits(&ctx, &params);

        assert_eq!(closed, 2);
        assert_eq!(book.open_count(), 1);
        let reasons: Vec<ExitReason> = book.closed_positions().iter().map(|c| c.exit_reason).collect();
        assert_eq!(reasons, vec![ExitReason::FixedTp, ExitReason::ConfLongExit]);
        assert_eq!(book.closed_positions()[0].pnl, 50.0);
        assert_eq!(book.closed_positions()[1].pnl, -10.0);
    }

    #[test]
    fn forced_exit_closes_all_open() {
        let params = TradingParams::default();
        let mut book = Portfolio::new();
        book.open_position(position(Direction::Long, 100.0, 20));
        book.open_position(position(Direction::Short, 100.0, 21));
        let ctx = BarContext {
            timestamp: ts(15, 13),
            price: 100.0,
            signal: None,
            atr: None,
        };
        assert_eq!(book.apply_exits(&ctx, &params), 2);
        assert!(book
            .closed_positions()
            .iter()
            .all(|c| c.exit_reason == ExitReason::ForcedExit));
    }

    #[test]
    fn close_all_moves_everything() {
        let mut book = Portfolio::new();
        book.open_position(position(Direction::Long, 100.0, 20));
        assert_eq!(book.close_all(ts(16, 0), 101.0, ExitReason::FinalClose), 1);
        assert_eq!(book.open_count(), 0);
        let closed = book.into_closed();
        assert_eq!(closed[0].exit_reason, ExitReason::FinalClose);
        assert_eq!(closed[0].exit_price, 101.0);
    }

    #[test]
    fn daily_state_resets_on_new_date() {
        let mut daily = DailyState::default();
        let monday = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        daily.roll(monday);
        daily.record_open();
        daily.record_open();
        daily.roll(monday);
        assert_eq!(daily.opened, 2);
        daily.roll(monday.succ_opt().unwrap());
        assert_eq!(daily.opened, 0);
    }
}
