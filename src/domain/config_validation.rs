//! Configuration validation.
//!
//! Validates every config field before a simulation or live session starts.
//! The typed readers here are also what the config builders use, so a value
//! that passes validation always builds.

use crate::domain::error::IntratraderError;
use crate::domain::params::TradingParams;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveTime};

pub fn validate_simulation_config(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    let start = read_date(config, "simulation", "start_date")?;
    let end = read_date(config, "simulation", "end_date")?;
    if end < start {
        return Err(IntratraderError::invalid(
            "simulation",
            "end_date",
            "end_date must not be before start_date",
        ));
    }
    Ok(())
}

pub fn validate_trading_config(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    validate_thresholds(config)?;
    validate_entry_window(config)?;
    read_time(config, "exit", "forced_exit_time", NaiveTime::MIN)?;
    read_positive_usize(config, "entry", "max_concurrent_positions", 60)?;
    read_positive_usize(config, "entry", "max_daily_positions", 70)?;
    validate_stops(config)?;
    validate_smoothing(config)?;
    Ok(())
}

pub fn validate_live_config(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    read_positive_u64(config, "live", "entry_interval_secs", 60)?;
    read_positive_u64(config, "live", "exit_interval_secs", 10)?;
    read_positive_u64(config, "live", "max_signal_age_secs", 120)?;
    read_positive_u64(config, "live", "call_timeout_secs", 5)?;
    read_positive_u64(config, "live", "retry_base_delay_ms", 500)?;
    read_u32(config, "live", "max_retries", 3)?;
    read_time(config, "live", "market_close", NaiveTime::MIN)?;
    Ok(())
}

fn validate_thresholds(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    read_probability(config, "entry", "long_threshold", 0.85)?;
    read_probability(config, "entry", "short_threshold", 0.85)?;
    read_probability(config, "exit", "exit_long_threshold", 0.51)?;
    read_probability(config, "exit", "exit_short_threshold", 0.51)?;
    Ok(())
}

fn validate_entry_window(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    let defaults = TradingParams::default();
    let start = read_time(config, "entry", "window_start", defaults.entry_window_start)?;
    let end = read_time(config, "entry", "window_end", defaults.entry_window_end)?;
    if start > end {
        return Err(IntratraderError::invalid(
            "entry",
            "window_start",
            "window_start must not be after window_end",
        ));
    }
    Ok(())
}

fn validate_stops(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    match read_stop_mode(config)? {
        StopMode::Fixed => {
            read_positive_f64(config, "stops", "profit_offset", 50.0)?;
            read_positive_f64(config, "stops", "loss_offset", 160.0)?;
        }
        StopMode::Atr => {
            read_positive_f64(config, "stops", "atr_multiplier", 5.0)?;
            read_positive_f64(config, "stops", "reward_ratio", 2.0)?;
        }
    }
    Ok(())
}

fn validate_smoothing(config: &dyn ConfigPort) -> Result<(), IntratraderError> {
    for prefix in ["entry", "exit"] {
        read_bool(config, "smoothing", &format!("{prefix}_enabled"), true)?;
        read_bool(config, "smoothing", &format!("{prefix}_weighted"), true)?;
        read_positive_usize(config, "smoothing", &format!("{prefix}_window"), 1)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Fixed,
    Atr,
}

pub fn read_stop_mode(config: &dyn ConfigPort) -> Result<StopMode, IntratraderError> {
    match present(config, "stops", "mode").as_deref() {
        None | Some("fixed") => Ok(StopMode::Fixed),
        Some("atr") => Ok(StopMode::Atr),
        Some(other) => Err(IntratraderError::invalid(
            "stops",
            "mode",
            format!("unknown stop mode '{other}', expected fixed or atr"),
        )),
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`).
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn present(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn read_date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<NaiveDate, IntratraderError> {
    let raw = present(config, section, key).ok_or_else(|| IntratraderError::missing(section, key))?;
    parse_date(&raw).ok_or_else(|| {
        IntratraderError::invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))
    })
}

pub fn read_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, IntratraderError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => parse_time(&raw).ok_or_else(|| {
            IntratraderError::invalid(section, key, format!("invalid time '{raw}', expected HH:MM"))
        }),
    }
}

pub fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, IntratraderError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(IntratraderError::invalid(section, key, format!("'{raw}' is not a number"))),
        },
    }
}

pub fn read_probability(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, IntratraderError> {
    let value = read_f64(config, section, key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(IntratraderError::invalid(section, key, format!("{key} must be between 0 and 1")));
    }
    Ok(value)
}

pub fn read_positive_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, IntratraderError> {
    let value = read_f64(config, section, key, default)?;
    if value <= 0.0 {
        return Err(IntratraderError::invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value)
}

fn read_i64(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, IntratraderError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| IntratraderError::invalid(section, key, format!("'{raw}' is not an integer"))),
    }
}

pub fn read_positive_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, IntratraderError> {
    let value = read_i64(config, section, key, default as i64)?;
    if value < 1 {
        return Err(IntratraderError::invalid(section, key, format!("{key} must be at least 1")));
    }
    usize::try_from(value).map_err(|_| IntratraderError::invalid(section, key, "value out of range"))
}

pub fn read_positive_u64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u64,
) -> Result<u64, IntratraderError> {
    let value = read_i64(config, section, key, default as i64)?;
    if value < 1 {
        return Err(IntratraderError::invalid(section, key, format!("{key} must be at least 1")));
    }
    u64::try_from(value).map_err(|_| IntratraderError::invalid(section, key, "value out of range"))
}

pub fn read_u32(config: &dyn ConfigPort, section: &str, key: &str, default: u32) -> Result<u32, IntratraderError> {
    let value = read_i64(config, section, key, i64::from(default))?;
    u32::try_from(value)
        .map_err(|_| IntratraderError::invalid(section, key, format!("{key} must be a non-negative integer")))
}

pub fn read_bool(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, IntratraderError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(IntratraderError::invalid(section, key, format!("'{raw}' is not a boolean"))),
        },
    }
}
