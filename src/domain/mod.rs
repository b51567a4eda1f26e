//! Core domain types and logic.

pub mod backtest;
pub mod bar;
pub mod config_validation;
pub mod entry_policy;
pub mod error;
pub mod exit_policy;
pub mod live;
pub mod metrics;
pub mod offsets;
pub mod params;
pub mod portfolio;
pub mod position;
pub mod retry;
pub mod series;
pub mod signal;
pub mod smoothing;
