//! Plain-text simulation report and trade list export.
//!
//! Each run writes `simulation_report_<n>.txt`, `detailed_trades_<n>.txt`
//! and `trades_<n>.csv`, where `<n>` is the first index not already used by
//! a report in the output directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::domain::backtest::{SimulationConfig, SimulationResult};
use crate::domain::error::IntratraderError;
use crate::domain::metrics::{PerformanceReport, PeriodSummary, Summary};
use crate::domain::offsets::OffsetStrategy;
use crate::domain::params::TradingParams;
use crate::domain::position::ClosedPosition;
use crate::domain::smoothing::{SmoothingMode, SmoothingSpec};
use crate::ports::report_port::ReportPort;

const RULE: &str = "============================================================\n";
const THIN_RULE: &str = "------------------------------------------------------------\n";

#[derive(Debug, Default)]
pub struct TextReportAdapter;

impl TextReportAdapter {
    pub fn new() -> Self {
        TextReportAdapter
    }

    /// First `n >= 1` for which `simulation_report_<n>.txt` does not exist.
    pub fn next_index(output_dir: &Path) -> usize {
        (1..)
            .find(|n| !output_dir.join(format!("simulation_report_{n}.txt")).exists())
            .unwrap_or(1)
    }
}

impl ReportPort for TextReportAdapter {
    fn write(
        &self,
        result: &SimulationResult,
        report: &PerformanceReport,
        config: &SimulationConfig,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, IntratraderError> {
        fs::create_dir_all(output_dir)?;
        let n = Self::next_index(output_dir);

        let report_path = output_dir.join(format!("simulation_report_{n}.txt"));
        fs::write(&report_path, render_report(result, report, config))?;

        let detail_path = output_dir.join(format!("detailed_trades_{n}.txt"));
        fs::write(&detail_path, render_trade_list(&result.closed))?;

        let csv_path = output_dir.join(format!("trades_{n}.csv"));
        CsvAdapter::write_trades(&csv_path, &result.closed)?;

        tracing::info!(dir = %output_dir.display(), index = n, "report written");
        Ok(vec![report_path, detail_path, csv_path])
    }
}

pub fn render_report(result: &SimulationResult, report: &PerformanceReport, config: &SimulationConfig) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push_str("INTRADAY SIMULATION REPORT\n");
    out.push_str(RULE);
    out.push_str(&format!(
        "Period: {} to {}\n\n",
        config.start_date.format("%Y-%m-%d"),
        config.end_date.format("%Y-%m-%d")
    ));

    out.push_str(&render_settings(&config.params));
    out.push('\n');

    out.push_str("RUN\n");
    out.push_str(THIN_RULE);
    out.push_str(&format!("Trading days processed: {}\n", result.days_processed));
    out.push_str(&format!("Bars processed:         {}\n", result.bars_processed));
    out.push_str(&format!("Peak open positions:    {}\n", result.peak_open));
    for (reason, count) in &result.skips {
        out.push_str(&format!("Skipped ({}): {}\n", reason.as_str(), count));
    }
    out.push('\n');

    out.push_str(&render_summary(&report.summary));
    out.push('\n');

    for (period, rows) in report.periods() {
        out.push_str(&format!("{} PERFORMANCE\n", period.title().to_uppercase()));
        out.push_str(THIN_RULE);
        out.push_str(&render_period_table(rows));
        out.push('\n');
    }

    out.push_str("EXIT REASONS\n");
    out.push_str(THIN_RULE);
    if report.by_reason.is_empty() {
        out.push_str("No trades.\n");
    }
    for row in &report.by_reason {
        out.push_str(&format!(
            "{:<16} {:>6} trades  {:>12.2} pts\n",
            row.reason.as_str(),
            row.trades,
            row.total_pnl
        ));
    }
    out
}

fn render_settings(params: &TradingParams) -> String {
    let mut out = String::new();
    out.push_str("SETTINGS\n");
    out.push_str(THIN_RULE);
    out.push_str(&format!(
        "Entry thresholds:      long >= {:.2}, short >= {:.2}\n",
        params.long_threshold, params.short_threshold
    ));
    out.push_str(&format!(
        "Entry window:          {} - {}\n",
        params.entry_window_start.format("%H:%M"),
        params.entry_window_end.format("%H:%M")
    ));
    out.push_str(&format!(
        "Forced exit:           {}\n",
        params.forced_exit_time.format("%H:%M")
    ));
    out.push_str(&format!(
        "Exit thresholds:       long >= {:.2}, short >= {:.2}\n",
        params.exit_long_threshold, params.exit_short_threshold
    ));
    out.push_str(&format!(
        "Position caps:         {} concurrent, {} per day\n",
        params.max_concurrent_positions, params.max_daily_positions
    ));
    let stops = match params.offsets {
        OffsetStrategy::Fixed(f) => format!("fixed, tp {} / sl {} pts", f.profit_offset, f.loss_offset),
        OffsetStrategy::Atr(a) => format!("atr x{}, reward ratio {}", a.multiplier, a.reward_ratio),
    };
    out.push_str(&format!("Stops:                 {stops}\n"));
    out.push_str(&format!(
        "Entry smoothing:       {}\n",
        describe_smoothing(&params.entry_smoothing)
    ));
    out.push_str(&format!(
        "Exit smoothing:        {}\n",
        describe_smoothing(&params.exit_smoothing)
    ));
    out
}

fn describe_smoothing(spec: &SmoothingSpec) -> String {
    if !spec.enabled {
        return "off".to_string();
    }
    let mode = match spec.mode {
        SmoothingMode::Simple => "simple",
        SmoothingMode::Weighted => "weighted",
    };
    format!("{mode}, window {}", spec.window)
}

fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str("SUMMARY\n");
    out.push_str(THIN_RULE);
    out.push_str(&format!("Total trades:   {}\n", summary.total_trades));
    out.push_str(&format!("Wins:           {}\n", summary.wins));
    out.push_str(&format!("Losses:         {}\n", summary.losses));
    out.push_str(&format!("Win rate:       {:.2}%\n", summary.win_rate * 100.0));
    out.push_str(&format!("Total P&L:      {:.2} pts\n", summary.total_pnl));
    out.push_str(&format!("Average win:    {:.2} pts\n", summary.avg_win));
    out.push_str(&format!("Average loss:   {:.2} pts\n", summary.avg_loss));
    out.push_str(&format!("Largest win:    {:.2} pts\n", summary.largest_win));
    out.push_str(&format!("Largest loss:   {:.2} pts\n", summary.largest_loss));
    let pf = if summary.profit_factor.is_infinite() {
        "inf".to_string()
    } else {
        format!("{:.2}", summary.profit_factor)
    };
    out.push_str(&format!("Profit factor:  {pf}\n"));
    out.push_str(&format!("Max drawdown:   {:.2} pts\n", summary.max_drawdown));
    out
}

fn render_period_table(rows: &[PeriodSummary]) -> String {
    if rows.is_empty() {
        return "No trades.\n".to_string();
    }
    let mut out = format!(
        "{:<12} {:>7} {:>6} {:>9} {:>12}\n",
        "Period", "Trades", "Wins", "Win rate", "P&L"
    );
    for row in rows {
        out.push_str(&format!(
            "{:<12} {:>7} {:>6} {:>8.1}% {:>12.2}\n",
            row.label,
            row.trades,
            row.wins,
            row.win_rate * 100.0,
            row.total_pnl
        ));
    }
    out
}

pub fn render_trade_list(trades: &[ClosedPosition]) -> String {
    let mut out = String::new();
    out.push_str("DETAILED TRADES\n");
    out.push_str(RULE);
    if trades.is_empty() {
        out.push_str("No trades.\n");
        return out;
    }
    for (i, t) in trades.iter().enumerate() {
        out.push_str(&format!(
            "#{:<4} {} {:<5} conf {:.3}\n",
            i + 1,
            t.entry_time.format("%Y-%m-%d %H:%M"),
            t.direction.as_str(),
            t.confidence
        ));
        out.push_str(&format!(
            "      entry {:.2}  sl {:.2}  tp {:.2}\n",
            t.entry_price, t.stop_loss, t.take_profit
        ));
        out.push_str(&format!(
            "      exit  {:.2} at {} ({})  pnl {:+.2}  {}\n",
            t.exit_price,
            t.exit_time.format("%Y-%m-%d %H:%M"),
            t.exit_reason.as_str(),
            t.pnl,
            t.result.as_str()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::SkipCounts;
    use crate::domain::entry_policy::SkipReason;
    use crate::domain::position::{Direction, ExitReason, Position};
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            start_date: NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            params: TradingParams::default(),
        }
    }

    fn result() -> SimulationResult {
        let open = Position {
            entry_time: ts(14, 9, 20),
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 1000.0,
            stop_loss: 840.0,
            take_profit: 1050.0,
        };
        let closed = vec![
            open.clone().close(ts(14, 9, 40), 1050.0, ExitReason::FixedTp),
            open.close(ts(15, 15, 13), 990.0, ExitReason::ForcedExit),
        ];
        let mut skips = SkipCounts::new();
        skips.insert(SkipReason::BelowThreshold, 12);
        SimulationResult {
            closed,
            bars_processed: 750,
            days_processed: 2,
            peak_open: 1,
            skips,
        }
    }

    #[test]
    fn report_lists_settings_summary_and_periods() {
        let result = result();
        let report = PerformanceReport::from_trades(&result.closed);
        let text = render_report(&result, &report, &config());

        assert!(text.contains("Period: 2025-07-14 to 2025-07-15"));
        assert!(text.contains("Entry window:          09:15 - 14:25"));
        assert!(text.contains("fixed, tp 50 / sl 160 pts"));
        assert!(text.contains("Total trades:   2"));
        assert!(text.contains("Win rate:       50.00%"));
        assert!(text.contains("Total P&L:      40.00 pts"));
        assert!(text.contains("Skipped (below_threshold): 12"));
        assert!(text.contains("DAILY PERFORMANCE"));
        assert!(text.contains("2025-07-14"));
        assert!(text.contains("2025-W29"));
        assert!(text.contains("fixed_tp"));
        assert!(text.contains("forced_exit"));
    }

    #[test]
    fn trade_list_shows_each_trade() {
        let text = render_trade_list(&result().closed);
        assert!(text.contains("#1"));
        assert!(text.contains("#2"));
        assert!(text.contains("pnl +50.00  WIN"));
        assert!(text.contains("pnl -10.00  LOSS"));
        assert!(render_trade_list(&[]).contains("No trades."));
    }

    #[test]
    fn write_uses_next_free_index() {
        let dir = TempDir::new().unwrap();
        let adapter = TextReportAdapter::new();
        let result = result();
        let report = PerformanceReport::from_trades(&result.closed);

        let first = adapter.write(&result, &report, &config(), dir.path()).unwrap();
        assert_eq!(first[0], dir.path().join("simulation_report_1.txt"));
        assert_eq!(first[1], dir.path().join("detailed_trades_1.txt"));
        assert_eq!(first[2], dir.path().join("trades_1.csv"));

        let second = adapter.write(&result, &report, &config(), dir.path()).unwrap();
        assert_eq!(second[0], dir.path().join("simulation_report_2.txt"));

        let csv = fs::read_to_string(&first[2]).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn write_creates_missing_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("reports/july");
        let result = result();
        let report = PerformanceReport::from_trades(&result.closed);
        let written = TextReportAdapter::new()
            .write(&result, &report, &config(), &nested)
            .unwrap();
        assert!(written.iter().all(|p| p.exists()));
    }
}
