//! Pipeline-level configuration: transfer mode, lineage options, resources.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::block::InitMetadata;
use crate::ext::ExtConfig;
use crate::loader::LoaderConfig;

pub const DEFAULT_PRIVATE_FIELD_PREFIX: &str = "__etl_private_field__";

/// How blocks travel between the extractor and the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    /// Raw file bytes pass through untouched; no transform stage runs.
    #[serde(rename = "copyFile")]
    CopyFile,
    /// Blocks are handled as Arrow tables and may be enriched or queried.
    #[serde(rename = "table", alias = "arrowTable")]
    Table,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CopyFile => f.write_str("copyFile"),
            Self::Table => f.write_str("table"),
        }
    }
}

/// Lineage field that can be materialised as a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivateField {
    IncrementalValue,
    ExtNameValue,
    PipelineNameValue,
    Path,
    Prefix,
}

impl PrivateField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncrementalValue => "incrementalValue",
            Self::ExtNameValue => "extNameValue",
            Self::PipelineNameValue => "pipelineNameValue",
            Self::Path => "path",
            Self::Prefix => "prefix",
        }
    }

    /// Column name for this field under `prefix`: `{prefix}-{field}`.
    #[must_use]
    pub fn column_name(self, prefix: &str) -> String {
        format!("{prefix}-{}", self.as_str())
    }
}

/// Column name of the run tag under `prefix`.
#[must_use]
pub fn tag_column_name(prefix: &str) -> String {
    format!("{prefix}-tagNameValue")
}

/// Queue and liveness tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Blocks each hand-off queue holds before producers suspend.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a consumer waits on an empty queue before re-checking the
    /// completion flags.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ResourceConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_queue_capacity() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_private_field_prefix() -> String {
    DEFAULT_PRIVATE_FIELD_PREFIX.to_string()
}

/// Fully resolved configuration of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Lineage name of the extractor; the extractor type tag when absent.
    #[serde(default)]
    pub ext_name: Option<String>,
    pub ext_config: ExtConfig,
    pub loader_config: LoaderConfig,
    pub transfer_mode: TransferMode,
    #[serde(default)]
    pub transform_sql: Option<String>,
    #[serde(default = "default_private_field_prefix")]
    pub private_field_prefix: String,
    #[serde(default)]
    pub include_private_fields: Vec<PrivateField>,
    #[serde(default)]
    pub tag_name_value: Option<String>,
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl PipelineConfig {
    #[must_use]
    pub fn ext_name_value(&self) -> String {
        self.ext_name
            .clone()
            .unwrap_or_else(|| self.ext_config.type_tag().to_string())
    }

    /// Whether any table-only operation (SQL, lineage columns, tag) is set.
    #[must_use]
    pub fn has_table_operations(&self) -> bool {
        self.transform_sql.is_some()
            || !self.include_private_fields.is_empty()
            || self.tag_name_value.is_some()
    }

    /// Run-level lineage for a run called `run_name`.
    #[must_use]
    pub fn init_metadata(&self, run_name: &str) -> InitMetadata {
        InitMetadata {
            ext_name_value: Some(self.ext_name_value()),
            pipeline_name_value: Some(run_name.to_string()),
            tag_name_value: self.tag_name_value.clone(),
        }
    }
}
