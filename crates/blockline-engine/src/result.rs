//! Pipeline run and check results.

use blockline_types::TransferMode;
use serde::Serialize;

use crate::state::Stage;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_name: String,
    pub transfer_mode: TransferMode,
    /// Blocks the extractor put on its queue, terminal block included.
    pub blocks_extracted: u64,
    /// Blocks forwarded by the transform worker; zero when none ran.
    pub blocks_transformed: u64,
    /// Blocks handed to the loader.
    pub blocks_loaded: u64,
    /// Table rows handed to the loader.
    pub rows_loaded: u64,
    /// File bytes handed to the loader.
    pub bytes_loaded: u64,
    pub duration_secs: f64,
}

/// What a run of a validated pipeline would do, without doing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub run_name: String,
    pub transfer_mode: TransferMode,
    pub extractor: &'static str,
    pub loader: &'static str,
    /// Stages that would run, in pipeline order.
    pub stages: Vec<Stage>,
    pub warnings: Vec<String>,
}
