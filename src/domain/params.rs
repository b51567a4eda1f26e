//! Trading parameters shared by the simulator and the live session.

use chrono::NaiveTime;

use super::offsets::OffsetStrategy;
use super::smoothing::SmoothingSpec;

#[derive(Debug, Clone, PartialEq)]
pub struct TradingParams {
    pub long_threshold: f64,
    pub short_threshold: f64,
    pub entry_window_start: NaiveTime,
    pub entry_window_end: NaiveTime,
    pub forced_exit_time: NaiveTime,
    pub exit_long_threshold: f64,
    pub exit_short_threshold: f64,
    pub max_concurrent_positions: usize,
    pub max_daily_positions: usize,
    pub offsets: OffsetStrategy,
    pub entry_smoothing: SmoothingSpec,
    pub exit_smoothing: SmoothingSpec,
}

impl TradingParams {
    pub fn in_entry_window(&self, time: NaiveTime) -> bool {
        self.entry_window_start <= time && time <= self.entry_window_end
    }

    pub fn is_forced_exit(&self, time: NaiveTime) -> bool {
        time >= self.forced_exit_time
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for TradingParams {
    fn default() -> Self {
        TradingParams {
            long_threshold: 0.85,
            short_threshold: 0.85,
            entry_window_start: hm(9, 15),
            entry_window_end: hm(14, 25),
            forced_exit_time: hm(15, 13),
            exit_long_threshold: 0.51,
            exit_short_threshold: 0.51,
            max_concurrent_positions: 60,
            max_daily_positions: 70,
            offsets: OffsetStrategy::default(),
            entry_smoothing: SmoothingSpec::weighted(3),
            exit_smoothing: SmoothingSpec::weighted(15),
        }
    }
}
