//! Report output port.

use std::path::{Path, PathBuf};

use crate::domain::backtest::RunResult;
use crate::domain::error::TradeError;

/// Port for persisting the outcome of a run.
pub trait ReportPort {
    /// Write the run under `output_dir` and return the files produced.
    fn write(&self, result: &RunResult, output_dir: &Path) -> Result<Vec<PathBuf>, TradeError>;
}
