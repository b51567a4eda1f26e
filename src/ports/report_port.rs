//! Report generation port trait.

use std::path::{Path, PathBuf};

use crate::domain::backtest::{SimulationConfig, SimulationResult};
use crate::domain::error::IntratraderError;
use crate::domain::metrics::PerformanceReport;

/// Port for writing simulation reports. Returns the paths written.
pub trait ReportPort {
    fn write(
        &self,
        result: &SimulationResult,
        report: &PerformanceReport,
        config: &SimulationConfig,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, IntratraderError>;
}
