//! Extractor configuration variants.

use serde::{Deserialize, Serialize};

use crate::conn::ConnConfig;
use crate::format::{Compression, FileFormat};

/// Extractor configuration, adjacently tagged like [`ConnConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum ExtConfig {
    #[serde(rename = "objectStorage", alias = "awsStorage")]
    ObjectStorage(ObjectStorageExtConfig),
    #[serde(rename = "relationalTable", alias = "postgresTable")]
    RelationalTable(RelationalTableExtConfig),
}

impl ExtConfig {
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "objectStorage",
        "awsStorage",
        "relationalTable",
        "postgresTable",
    ];

    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ObjectStorage(_) => "objectStorage",
            Self::RelationalTable(_) => "relationalTable",
        }
    }

    #[must_use]
    pub fn conn_config(&self) -> &ConnConfig {
        match self {
            Self::ObjectStorage(c) => &c.conn_config,
            Self::RelationalTable(c) => &c.conn_config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageExtConfig {
    pub conn_config: ConnConfig,
    pub bucket_name: String,
    /// Listing prefix; may contain `{{ execution_time }}` templates.
    #[serde(default)]
    pub prefix: String,
    /// Glob applied to `prefix/<key>`; may contain templates.
    #[serde(default)]
    pub path_glob_filter: Option<String>,
    /// Allow wildcards to match across `/`.
    #[serde(default)]
    pub recursive: bool,
    /// Leading path stripped from keys before they become lineage paths.
    #[serde(default)]
    pub remove_prefix_path: Option<String>,
    #[serde(default)]
    pub file_type: FileFormat,
    #[serde(default)]
    pub compress_type: Option<Compression>,
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    /// Resume listing strictly after this key.
    #[serde(default)]
    pub start_after: Option<String>,
}

fn default_max_keys() -> usize {
    1000
}

/// Comparison used against the incremental watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrementalMode {
    #[default]
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
}

impl IncrementalMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalTableExtConfig {
    pub conn_config: ConnConfig,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    /// Columns to read; all columns when absent.
    #[serde(default)]
    pub selected_fields: Option<Vec<String>>,
    /// Extra predicate appended to the WHERE clause.
    #[serde(default)]
    pub filter_sql: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub incremental_field: String,
    #[serde(default)]
    pub incremental_mode: IncrementalMode,
    #[serde(default)]
    pub incremental_value: Option<String>,
    /// ORDER BY expression; defaults to the incremental field.
    #[serde(default)]
    pub order_sql: Option<String>,
}

pub(crate) fn default_schema() -> String {
    "public".to_string()
}

fn default_batch_size() -> usize {
    10_000
}
