//! Pipeline parsing, validation and staged execution for blockline.
//!
//! A run moves [`blockline_types::DataBlock`]s from an extractor to a loader
//! over bounded queues, optionally through a [`transform::Transformer`] in
//! table mode. See [`orchestrator`] for how stages end and fail.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod result;
pub mod state;
pub mod transform;

pub use config::{parse_pipeline, parse_pipeline_str, PipelineDocument};
pub use error::{PipelineError, StageFailure};
pub use orchestrator::{check_pipeline, run_pipeline, Pipeline};
pub use result::{CheckReport, RunReport};
pub use state::{ProcessState, RunState, Stage};
pub use transform::Transformer;
