//! Port traits at the I/O seams.

pub mod broker_port;
pub mod config_port;
pub mod data_port;
pub mod market_feed_port;
pub mod notifier_port;
pub mod report_port;
pub mod store_port;
