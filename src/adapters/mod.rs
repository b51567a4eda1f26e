//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
#[cfg(feature = "live")]
pub mod live_runner;
pub mod log_notifier;
pub mod paper_broker;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod text_report_adapter;
