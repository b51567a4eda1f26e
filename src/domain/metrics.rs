//! Trade statistics and period aggregation.
//!
//! Everything here is a pure function of the closed-position list.

use std::collections::BTreeMap;

use chrono::Datelike;

use super::position::{ClosedPosition, ExitReason, TradeResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    /// Largest peak-to-trough fall of cumulative P&L, in price points.
    pub max_drawdown: f64,
}

impl Summary {
    pub fn compute(trades: &[ClosedPosition]) -> Self {
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut losing_count = 0usize;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            match trade.result {
                TradeResult::Win => wins += 1,
                TradeResult::Loss => losses += 1,
            }
            let pnl = trade.pnl;
            if pnl > 0.0 {
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                gross_loss += pnl.abs();
                losing_count += 1;
                largest_loss = largest_loss.max(pnl.abs());
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if wins > 0 { gross_profit / wins as f64 } else { 0.0 };
        let avg_loss = if losing_count > 0 {
            gross_loss / losing_count as f64
        } else {
            0.0
        };

        Summary {
            total_trades,
            wins,
            losses,
            win_rate,
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            max_drawdown: max_drawdown(trades),
        }
    }
}

fn max_drawdown(trades: &[ClosedPosition]) -> f64 {
    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for trade in trades {
        cumulative += trade.pnl;
        peak = peak.max(cumulative);
        max_dd = max_dd.max(peak - cumulative);
    }
    max_dd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// Sortable label for the period containing the trade's entry date.
    /// Weeks are ISO weeks.
    pub fn label(&self, trade: &ClosedPosition) -> String {
        let date = trade.entry_time.date();
        match self {
            Period::Daily => date.format("%Y-%m-%d").to_string(),
            Period::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Period::Monthly => date.format("%Y-%m").to_string(),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Period::Daily => "Daily",
            Period::Weekly => "Weekly",
            Period::Monthly => "Monthly",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSummary {
    pub label: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

pub fn summarize_by(trades: &[ClosedPosition], period: Period) -> Vec<PeriodSummary> {
    let mut groups: BTreeMap<String, (usize, usize, f64)> = BTreeMap::new();
    for trade in trades {
        let entry = groups.entry(period.label(trade)).or_insert((0, 0, 0.0));
        entry.0 += 1;
        if trade.is_win() {
            entry.1 += 1;
        }
        entry.2 += trade.pnl;
    }

    groups
        .into_iter()
        .map(|(label, (count, wins, pnl))| PeriodSummary {
            label,
            trades: count,
            wins,
            win_rate: wins as f64 / count as f64,
            total_pnl: pnl,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasonSummary {
    pub reason: ExitReason,
    pub trades: usize,
    pub total_pnl: f64,
}

/// One row per close reason that occurred, in the canonical reason order.
pub fn summarize_by_reason(trades: &[ClosedPosition]) -> Vec<ReasonSummary> {
    ExitReason::ALL
        .iter()
        .filter_map(|&reason| {
            let matching: Vec<&ClosedPosition> =
                trades.iter().filter(|t| t.exit_reason == reason).collect();
            if matching.is_empty() {
                None
            } else {
                Some(ReasonSummary {
                    reason,
                    trades: matching.len(),
                    total_pnl: matching.iter().map(|t| t.pnl).sum(),
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub summary: Summary,
    pub daily: Vec<PeriodSummary>,
    pub weekly: Vec<PeriodSummary>,
    pub monthly: Vec<PeriodSummary>,
    pub by_reason: Vec<ReasonSummary>,
}

impl PerformanceReport {
    pub fn from_trades(trades: &[ClosedPosition]) -> Self {
        PerformanceReport {
            summary: Summary::compute(trades),
            daily: summarize_by(trades, Period::Daily),
            weekly: summarize_by(trades, Period::Weekly),
            monthly: summarize_by(trades, Period::Monthly),
            by_reason: summarize_by_reason(trades),
        }
    }

    pub fn periods(&self) -> [(Period, &[PeriodSummary]); 3] {
        [
            (Period::Daily, &self.daily),
            (Period::Weekly, &self.weekly),
            (Period::Monthly, &self.monthly),
        ]
    }
}
