//! Domain error types.

use std::time::Duration;

use chrono::NaiveDateTime;

/// Top-level error type for intratrader.
///
/// Missing signals and capacity skips are not errors; they surface as
/// `Option::None` lookups and [`crate::domain::entry_policy::SkipReason`].
#[derive(Debug, thiserror::Error)]
pub enum IntratraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("{series} series out of order at {timestamp} (previous {previous})")]
    DataOrdering {
        series: String,
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },

    #[error("invalid {series} row at {timestamp}: {reason}")]
    DataInvalid {
        series: String,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("broker error: {reason}")]
    Broker { reason: String },

    #[error("{call} timed out after {after:?}")]
    Timeout { call: String, after: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntratraderError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            IntratraderError::ConfigParse { .. }
                | IntratraderError::ConfigMissing { .. }
                | IntratraderError::ConfigInvalid { .. }
        )
    }

    /// A timed-out call may still have completed on the far side.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IntratraderError::Timeout { .. })
    }

    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        IntratraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(section: &str, key: &str) -> Self {
        IntratraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&IntratraderError> for std::process::ExitCode {
    fn from(err: &IntratraderError) -> Self {
        let code: u8 = match err {
            IntratraderError::Io(_) | IntratraderError::Broker { .. } | IntratraderError::Timeout { .. } => 1,
            IntratraderError::ConfigParse { .. }
            | IntratraderError::ConfigMissing { .. }
            | IntratraderError::ConfigInvalid { .. } => 2,
            IntratraderError::Database { .. } | IntratraderError::DatabaseQuery { .. } => 3,
            IntratraderError::DataOrdering { .. }
            | IntratraderError::DataInvalid { .. }
            | IntratraderError::Data { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
