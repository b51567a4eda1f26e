//! Simulation clock: day-by-day, bar-by-bar replay.
//!
//! States: `AwaitingDay -> ProcessingBar -> DayComplete -> (next day | Finished)`.
//! Per bar, every open position runs through the exit chain before the entry
//! gate is consulted, so a position can never open and close on one bar.
//! Nothing here reads the wall clock or a random source.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::bar::Bar;
use super::entry_policy::{evaluate_entry, EntryDecision, EntryGate, SkipReason};
use super::params::TradingParams;
use super::portfolio::{DailyState, Portfolio};
use super::position::{ClosedPosition, ExitReason};
use super::series::MarketData;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub params: TradingParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    AwaitingDay(NaiveDate),
    ProcessingBar { date: NaiveDate, index: usize },
    DayComplete(NaiveDate),
    Finished,
}

pub type SkipCounts = BTreeMap<SkipReason, usize>;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Closed positions in the order they were closed.
    pub closed: Vec<ClosedPosition>,
    pub bars_processed: usize,
    pub days_processed: usize,
    pub peak_open: usize,
    pub skips: SkipCounts,
}

pub struct SimulationClock<'a> {
    data: &'a MarketData,
    config: &'a SimulationConfig,
    state: ClockState,
    book: Portfolio,
    daily: DailyState,
    skips: SkipCounts,
    bars_processed: usize,
    days_processed: usize,
    peak_open: usize,
}

impl<'a> SimulationClock<'a> {
    pub fn new(data: &'a MarketData, config: &'a SimulationConfig) -> Self {
        SimulationClock {
            data,
            config,
            state: ClockState::AwaitingDay(config.start_date),
            book: Portfolio::new(),
            daily: DailyState::default(),
            skips: SkipCounts::new(),
            bars_processed: 0,
            days_processed: 0,
            peak_open: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Advance one transition.
    pub fn step(&mut self) {
        self.state = match self.state {
            ClockState::AwaitingDay(date) => {
                if date > self.config.end_date {
                    ClockState::Finished
                } else {
                    self.daily.roll(date);
                    if self.data.bars_for_day(date).is_empty() {
                        ClockState::DayComplete(date)
                    } else {
                        self.days_processed += 1;
                        ClockState::ProcessingBar { date, index: 0 }
                    }
                }
            }
            ClockState::ProcessingBar { date, index } => {
                let bars = self.data.bars_for_day(date);
                if let Some(bar) = bars.get(index) {
                    self.process_bar(bar);
                }
                if index + 1 < bars.len() {
                    ClockState::ProcessingBar {
                        date,
                        index: index + 1,
                    }
                } else {
                    ClockState::DayComplete(date)
                }
            }
            ClockState::DayComplete(date) => match date.succ_opt() {
                Some(next) => ClockState::AwaitingDay(next),
                None => ClockState::Finished,
            },
            ClockState::Finished => ClockState::Finished,
        };
    }

    fn process_bar(&mut self, bar: &Bar) {
        let params = &self.config.params;
        let ctx = self.data.context(bar);
        self.bars_processed += 1;

        self.book.apply_exits(&ctx, params);

        let decision = if self.data.is_last_bar(bar.timestamp) {
            EntryDecision::Skip(SkipReason::FinalBar)
        } else {
            let gate = EntryGate {
                open_positions: self.book.open_count(),
                opened_today: self.daily.opened,
            };
            evaluate_entry(&ctx, gate, params)
        };

        match decision.into_position(&ctx, ctx.price, params) {
            Some(position) => {
                tracing::debug!(
                    time = %position.entry_time,
                    direction = %position.direction,
                    price = position.entry_price,
                    confidence = position.confidence,
                    "position opened"
                );
                self.book.open_position(position);
                self.daily.record_open();
                self.peak_open = self.peak_open.max(self.book.open_count());
            }
            None => {
                if let EntryDecision::Skip(reason) = decision {
                    if reason != SkipReason::OutsideWindow {
                        tracing::trace!(time = %bar.timestamp, reason = reason.as_str(), "entry skipped");
                    }
                    *self.skips.entry(reason).or_insert(0) += 1;
                }
            }
        }
    }

    /// Drive the clock to `Finished`, then close stragglers at the last bar
    /// of the whole series.
    pub fn run(mut self) -> SimulationResult {
        while self.state != ClockState::Finished {
            self.step();
        }

        if let Some(last) = self.data.last_bar() {
            let closed = self
                .book
                .close_all(last.timestamp, last.close, ExitReason::FinalClose);
            if closed > 0 {
                tracing::debug!(count = closed, time = %last.timestamp, "final close");
            }
        }

        SimulationResult {
            closed: self.book.into_closed(),
            bars_processed: self.bars_processed,
            days_processed: self.days_processed,
            peak_open: self.peak_open,
            skips: self.skips,
        }
    }
}

pub fn run_simulation(data: &MarketData, config: &SimulationConfig) -> SimulationResult {
    tracing::info!(
        start = %config.start_date,
        end = %config.end_date,
        bars = data.bars().len(),
        signals = data.signal_count(),
        stops = config.params.offsets.name(),
        "simulation started"
    );
    let result = SimulationClock::new(data, config).run();
    tracing::info!(
        days = result.days_processed,
        bars = result.bars_processed,
        trades = result.closed.len(),
        "simulation finished"
    );
    result
}
