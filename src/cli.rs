//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::text_report_adapter::TextReportAdapter;
use crate::domain::backtest::{run_simulation, SimulationConfig, SimulationResult};
use crate::domain::config_validation::{
    read_bool, read_date, read_positive_f64, read_positive_u64, read_positive_usize, read_probability,
    read_stop_mode, read_time, read_u32, validate_live_config, validate_simulation_config,
    validate_trading_config, StopMode,
};
use crate::domain::error::IntratraderError;
use crate::domain::live::LiveSettings;
use crate::domain::metrics::PerformanceReport;
use crate::domain::offsets::{AtrMultiple, FixedPoints, OffsetCalculator, OffsetStrategy};
use crate::domain::params::TradingParams;
use crate::domain::retry::RetryPolicy;
use crate::domain::series::{check_raw_predictions, prepare_signals, MarketData};
use crate::domain::signal::PredictionInput;
use crate::domain::smoothing::{smooth_predictions, SmoothingSpec};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "intratrader", about = "Intraday futures backtesting simulator")]
pub struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulation and write reports
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Report directory, overrides [report] output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Smooth a raw prediction file and write the smoothed columns
    Smooth {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Raw predictions, defaults to [data] predictions
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show the range of the configured bar series
    Info {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Load CSV series into the SQLite store
    #[cfg(feature = "sqlite")]
    Import {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the live paper-trading session
    #[cfg(all(feature = "live", feature = "sqlite"))]
    Live {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config, output } => run_backtest(&config, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Smooth {
            config,
            input,
            output,
        } => run_smooth(config.as_deref(), input.as_deref(), &output),
        Command::Info { config } => run_info(&config),
        #[cfg(feature = "sqlite")]
        Command::Import { config } => run_import(&config),
        #[cfg(all(feature = "live", feature = "sqlite"))]
        Command::Live { config } => run_live(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: IntratraderError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn build_trading_params(config: &dyn ConfigPort) -> Result<TradingParams, IntratraderError> {
    let d = TradingParams::default();

    let offsets = match read_stop_mode(config)? {
        StopMode::Fixed => OffsetStrategy::Fixed(FixedPoints {
            profit_offset: read_positive_f64(config, "stops", "profit_offset", 50.0)?,
            loss_offset: read_positive_f64(config, "stops", "loss_offset", 160.0)?,
        }),
        StopMode::Atr => OffsetStrategy::Atr(AtrMultiple {
            multiplier: read_positive_f64(config, "stops", "atr_multiplier", 5.0)?,
            reward_ratio: read_positive_f64(config, "stops", "reward_ratio", 2.0)?,
        }),
    };

    Ok(TradingParams {
        long_threshold: read_probability(config, "entry", "long_threshold", d.long_threshold)?,
        short_threshold: read_probability(config, "entry", "short_threshold", d.short_threshold)?,
        entry_window_start: read_time(config, "entry", "window_start", d.entry_window_start)?,
        entry_window_end: read_time(config, "entry", "window_end", d.entry_window_end)?,
        forced_exit_time: read_time(config, "exit", "forced_exit_time", d.forced_exit_time)?,
        exit_long_threshold: read_probability(config, "exit", "exit_long_threshold", d.exit_long_threshold)?,
        exit_short_threshold: read_probability(config, "exit", "exit_short_threshold", d.exit_short_threshold)?,
        max_concurrent_positions: read_positive_usize(
            config,
            "entry",
            "max_concurrent_positions",
            d.max_concurrent_positions,
        )?,
        max_daily_positions: read_positive_usize(config, "entry", "max_daily_positions", d.max_daily_positions)?,
        offsets,
        entry_smoothing: build_smoothing(config, "entry", &d.entry_smoothing)?,
        exit_smoothing: build_smoothing(config, "exit", &d.exit_smoothing)?,
    })
}

fn build_smoothing(
    config: &dyn ConfigPort,
    prefix: &str,
    default: &SmoothingSpec,
) -> Result<SmoothingSpec, IntratraderError> {
    let enabled = read_bool(config, "smoothing", &format!("{prefix}_enabled"), default.enabled)?;
    if !enabled {
        return Ok(SmoothingSpec::disabled());
    }
    let window = read_positive_usize(config, "smoothing", &format!("{prefix}_window"), default.window)?;
    let weighted = read_bool(config, "smoothing", &format!("{prefix}_weighted"), true)?;
    Ok(if weighted {
        SmoothingSpec::weighted(window)
    } else {
        SmoothingSpec::simple(window)
    })
}

pub fn build_simulation_config(config: &dyn ConfigPort) -> Result<SimulationConfig, IntratraderError> {
    validate_simulation_config(config)?;
    validate_trading_config(config)?;
    Ok(SimulationConfig {
        start_date: read_date(config, "simulation", "start_date")?,
        end_date: read_date(config, "simulation", "end_date")?,
        params: build_trading_params(config)?,
    })
}

pub fn build_live_settings(config: &dyn ConfigPort) -> Result<LiveSettings, IntratraderError> {
    validate_live_config(config)?;
    let d = LiveSettings::default();
    Ok(LiveSettings {
        entry_interval: Duration::from_secs(read_positive_u64(
            config,
            "live",
            "entry_interval_secs",
            d.entry_interval.as_secs(),
        )?),
        exit_interval: Duration::from_secs(read_positive_u64(
            config,
            "live",
            "exit_interval_secs",
            d.exit_interval.as_secs(),
        )?),
        market_close: read_time(config, "live", "market_close", d.market_close)?,
        max_signal_age: Duration::from_secs(read_positive_u64(
            config,
            "live",
            "max_signal_age_secs",
            d.max_signal_age.as_secs(),
        )?),
        retry: RetryPolicy {
            max_retries: read_u32(config, "live", "max_retries", d.retry.max_retries)?,
            base_delay: Duration::from_millis(read_positive_u64(
                config,
                "live",
                "retry_base_delay_ms",
                d.retry.base_delay.as_millis() as u64,
            )?),
        },
        call_timeout: Duration::from_secs(read_positive_u64(
            config,
            "live",
            "call_timeout_secs",
            d.call_timeout.as_secs(),
        )?),
    })
}

/// The series store named by `[data] source` (`csv` by default).
pub fn open_data_source(config: &FileConfigAdapter) -> Result<Box<dyn DataPort>, IntratraderError> {
    let source = config
        .get_string("data", "source")
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| "csv".to_string());
    match source.as_str() {
        "csv" => Ok(Box::new(csv_source(config)?)),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Box::new(sqlite_store(config)?)),
        other => Err(IntratraderError::invalid(
            "data",
            "source",
            format!("unsupported data source '{other}'"),
        )),
    }
}

fn csv_source(config: &FileConfigAdapter) -> Result<CsvAdapter, IntratraderError> {
    let bars = config
        .get_path("data", "bars")
        .ok_or_else(|| IntratraderError::missing("data", "bars"))?;
    let predictions = config
        .get_path("data", "predictions")
        .ok_or_else(|| IntratraderError::missing("data", "predictions"))?;
    Ok(CsvAdapter::new(bars, predictions, config.get_path("data", "features")))
}

#[cfg(feature = "sqlite")]
fn sqlite_store(config: &FileConfigAdapter) -> Result<crate::adapters::sqlite_adapter::SqliteAdapter, IntratraderError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let path = config
        .get_path("sqlite", "path")
        .ok_or_else(|| IntratraderError::missing("sqlite", "path"))?;
    let pool_size = read_positive_u64(config, "sqlite", "pool_size", 4)?;
    let store = SqliteAdapter::open(&path, u32::try_from(pool_size).unwrap_or(u32::MAX))?;
    store.initialize_schema()?;
    Ok(store)
}

/// Fetch and validate all three series for a simulation.
pub fn load_market_data(data: &dyn DataPort, config: &SimulationConfig) -> Result<MarketData, IntratraderError> {
    let bars = data.fetch_bars(config.start_date)?;
    let signals = prepare_signals(data.fetch_predictions()?, &config.params)?;
    let features = data.fetch_features()?;
    if config.params.offsets.requires_atr() && features.is_empty() {
        tracing::warn!("atr stops configured but no feature rows loaded; every entry will be skipped");
    }
    MarketData::new(bars, signals, features)
}

pub struct PipelineOutput {
    pub result: SimulationResult,
    pub report: PerformanceReport,
    pub files: Vec<PathBuf>,
}

/// Load data, simulate, aggregate and write the report files.
pub fn run_backtest_pipeline(
    data: &dyn DataPort,
    reporter: &dyn ReportPort,
    config: &SimulationConfig,
    output_dir: &Path,
) -> Result<PipelineOutput, IntratraderError> {
    let market = load_market_data(data, config)?;
    if market.bars().is_empty() {
        return Err(IntratraderError::Data {
            reason: format!("no bars on or after {}", config.start_date),
        });
    }
    eprintln!(
        "Running simulation: {} to {}, {} bars, {} signals",
        config.start_date,
        config.end_date,
        market.bars().len(),
        market.signal_count()
    );

    let result = run_simulation(&market, config);
    let report = PerformanceReport::from_trades(&result.closed);
    let files = reporter.write(&result, &report, config, output_dir)?;
    Ok(PipelineOutput { result, report, files })
}

fn run_backtest(config_path: &Path, output: Option<&Path>) -> ExitCode {
    // Stage 1: Load config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    // Stage 2: Validate and build the simulation config
    let sim_config = match build_simulation_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    // Stage 3: Open the series store
    let data = match open_data_source(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    let output_dir = output
        .map(Path::to_path_buf)
        .or_else(|| adapter.get_path("report", "output_dir"))
        .unwrap_or_else(|| PathBuf::from("reports"));

    // Stages 4-6: Simulate and report
    let out = match run_backtest_pipeline(data.as_ref(), &TextReportAdapter::new(), &sim_config, &output_dir) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };

    let s = &out.report.summary;
    eprintln!("\n=== Results ===");
    eprintln!("Trading days:     {}", out.result.days_processed);
    eprintln!("Total trades:     {}", s.total_trades);
    eprintln!("Wins / losses:    {} / {}", s.wins, s.losses);
    eprintln!("Win rate:         {:.1}%", s.win_rate * 100.0);
    eprintln!("Total P&L:        {:.2} pts", s.total_pnl);
    eprintln!("Max drawdown:     {:.2} pts", s.max_drawdown);
    eprintln!("Profit factor:    {:.2}", s.profit_factor);

    for path in &out.files {
        println!("{}", path.display());
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let sim_config = match build_simulation_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Err(e) = build_live_settings(&adapter) {
        return fail(e);
    }
    if let Err(e) = open_data_source(&adapter) {
        return fail(e);
    }

    let p = &sim_config.params;
    eprintln!("  period:      {} to {}", sim_config.start_date, sim_config.end_date);
    eprintln!("  thresholds:  long {:.2}, short {:.2}", p.long_threshold, p.short_threshold);
    eprintln!("  window:      {} - {}", p.entry_window_start, p.entry_window_end);
    eprintln!("  forced exit: {}", p.forced_exit_time);
    eprintln!("  stops:       {}", p.offsets.name());
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_smooth(config_path: Option<&Path>, input: Option<&Path>, output: &Path) -> ExitCode {
    let adapter = match config_path.map(load_config).transpose() {
        Ok(a) => a,
        Err(code) => return code,
    };
    let params = match adapter.as_ref().map(|a| build_trading_params(a)).transpose() {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => return fail(e),
    };

    let input = match input
        .map(Path::to_path_buf)
        .or_else(|| adapter.as_ref().and_then(|a| a.get_path("data", "predictions")))
    {
        Some(p) => p,
        None => return fail(IntratraderError::missing("data", "predictions")),
    };

    eprintln!("Smoothing {}", input.display());
    let rows = match CsvAdapter::read_predictions(&input) {
        Ok(PredictionInput::Raw(rows)) => rows,
        Ok(PredictionInput::Smoothed(_)) => {
            return fail(IntratraderError::Data {
                reason: format!("{} is already smoothed", input.display()),
            })
        }
        Err(e) => return fail(e),
    };
    if let Err(e) = check_raw_predictions(&rows) {
        return fail(e);
    }

    let smoothed = smooth_predictions(&rows, &params.entry_smoothing, &params.exit_smoothing);
    if let Err(e) = CsvAdapter::write_smoothed_predictions(output, &smoothed) {
        return fail(e);
    }
    eprintln!("{} rows written to {}", smoothed.len(), output.display());
    ExitCode::SUCCESS
}

fn run_info(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data = match open_data_source(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    match data.bar_range() {
        Ok(Some((first, last, count))) => println!("bars: {count}, {first} to {last}"),
        Ok(None) => eprintln!("bars: no data found"),
        Err(e) => return fail(e),
    }
    match data.fetch_predictions() {
        Ok(PredictionInput::Raw(rows)) => println!("predictions: {} raw", rows.len()),
        Ok(PredictionInput::Smoothed(rows)) => println!("predictions: {} smoothed", rows.len()),
        Err(e) => return fail(e),
    }
    match data.fetch_features() {
        Ok(rows) => println!(
            "features: {}, {} with atr",
            rows.len(),
            rows.iter().filter(|r| r.atr.is_some()).count()
        ),
        Err(e) => return fail(e),
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "sqlite")]
fn run_import(config_path: &Path) -> ExitCode {
    use crate::ports::store_port::{BatchInsertReport, SeriesStorePort};

    fn print_report(series: &str, report: &BatchInsertReport) {
        eprintln!(
            "  {series}: {} attempted, {} inserted, {} failed",
            report.attempted,
            report.inserted,
            report.failed()
        );
        for f in report.failures.iter().take(10) {
            eprintln!("    row {} ({}): {}", f.index + 1, f.timestamp, f.reason);
        }
        if report.failed() > 10 {
            eprintln!("    ... {} more", report.failed() - 10);
        }
    }

    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let params = match build_trading_params(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let source = match csv_source(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let store = match sqlite_store(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    eprintln!("Importing CSV series into SQLite");
    let mut failed = 0usize;

    let bars = match source.fetch_bars(chrono::NaiveDate::MIN) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };
    match store.insert_bars(&bars) {
        Ok(r) => {
            print_report("bars", &r);
            failed += r.failed();
        }
        Err(e) => return fail(e),
    }

    let predictions = match source.fetch_predictions() {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let smoothed = match predictions {
        PredictionInput::Raw(rows) => {
            match store.insert_raw_predictions(&rows) {
                Ok(r) => {
                    print_report("raw predictions", &r);
                    failed += r.failed();
                }
                Err(e) => return fail(e),
            }
            if let Err(e) = check_raw_predictions(&rows) {
                return fail(e);
            }
            smooth_predictions(&rows, &params.entry_smoothing, &params.exit_smoothing)
        }
        PredictionInput::Smoothed(signals) => signals,
    };
    match store.insert_smoothed_predictions(&smoothed) {
        Ok(r) => {
            print_report("smoothed predictions", &r);
            failed += r.failed();
        }
        Err(e) => return fail(e),
    }

    let features = match source.fetch_features() {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    if !features.is_empty() {
        match store.insert_features(&features) {
            Ok(r) => {
                print_report("features", &r);
                failed += r.failed();
            }
            Err(e) => return fail(e),
        }
    }

    if failed > 0 {
        eprintln!("Import finished with {failed} rejected rows");
    } else {
        eprintln!("Import finished");
    }
    ExitCode::SUCCESS
}

#[cfg(all(feature = "live", feature = "sqlite"))]
fn run_live(config_path: &Path) -> ExitCode {
    use crate::adapters::live_runner::{LiveRunner, LiveServices};
    use crate::adapters::log_notifier::LogNotifier;
    use crate::adapters::paper_broker::PaperBroker;
    use crate::domain::config_validation::read_f64;
    use crate::domain::live::LiveSession;
    use crate::ports::store_port::LiveStatePort;
    use std::sync::Arc;

    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let params = match validate_trading_config(&adapter).and_then(|()| build_trading_params(&adapter)) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let settings = match build_live_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let slippage = match read_f64(&adapter, "live", "paper_slippage", 0.0) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let store = match sqlite_store(&adapter) {
        Ok(s) => Arc::new(s),
        Err(e) => return fail(e),
    };

    let today = chrono::Local::now().date_naive();
    let saved = match store.load_live_state(today) {
        Ok(state) => state,
        Err(e) => return fail(e),
    };
    if !saved.open_positions.is_empty() {
        eprintln!("Resuming {} open positions", saved.open_positions.len());
    }

    let services = LiveServices {
        feed: store.clone(),
        broker: Arc::new(PaperBroker::new(slippage)),
        notifier: Arc::new(LogNotifier),
        ledger: Some(store.clone()),
        state: Some(store),
    };
    let runner = LiveRunner::new(LiveSession::restore(params, settings, saved), services);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => return fail(e.into()),
    };
    eprintln!("Live session running, press Ctrl-C to stop");
    match runtime.block_on(runner.run()) {
        Ok(summary) => {
            let pnl: f64 = summary.trades.iter().map(|t| t.pnl).sum();
            eprintln!(
                "Session ended ({:?}): {} trades, {:.2} pts, {} degraded ticks",
                summary.stop,
                summary.trades.len(),
                pnl,
                summary.degraded_ticks
            );
            if !summary.left_open.is_empty() {
                eprintln!("warning: {} positions still open", summary.left_open.len());
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
