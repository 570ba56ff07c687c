//! Pipeline document parsing and validation.

pub mod parser;
pub mod validator;

pub use parser::{parse_pipeline, parse_pipeline_str, resolve_document, PipelineDocument};
pub use validator::{validate_document, validate_pipeline, validate_stages};
