//! Loader configuration variants.

use serde::{Deserialize, Serialize};

use crate::conn::ConnConfig;
use crate::ext::default_schema;
use crate::format::FileFormat;

/// Loader configuration, adjacently tagged like [`ConnConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum LoaderConfig {
    #[serde(rename = "objectStorage", alias = "awsStorage")]
    ObjectStorage(ObjectStorageLoaderConfig),
    #[serde(rename = "datasetRepo", alias = "huggingFace")]
    DatasetRepo(DatasetRepoLoaderConfig),
    #[serde(rename = "relationalTable", alias = "postgresTable")]
    RelationalTable(RelationalTableLoaderConfig),
}

impl LoaderConfig {
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "objectStorage",
        "awsStorage",
        "datasetRepo",
        "huggingFace",
        "relationalTable",
        "postgresTable",
    ];

    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ObjectStorage(_) => "objectStorage",
            Self::DatasetRepo(_) => "datasetRepo",
            Self::RelationalTable(_) => "relationalTable",
        }
    }

    #[must_use]
    pub fn conn_config(&self) -> &ConnConfig {
        match self {
            Self::ObjectStorage(c) => &c.conn_config,
            Self::DatasetRepo(c) => &c.conn_config,
            Self::RelationalTable(c) => &c.conn_config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageLoaderConfig {
    pub conn_config: ConnConfig,
    pub bucket_name: String,
    /// Destination folder; may contain templates.
    #[serde(default)]
    pub folder: String,
    /// Serialisation used for table payloads.
    #[serde(default)]
    pub file_type: FileFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRepoLoaderConfig {
    pub conn_config: ConnConfig,
    pub repo_id: String,
    #[serde(default = "default_repo_type")]
    pub repo_type: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub file_type: FileFormat,
    #[serde(default)]
    pub commit_message: Option<String>,
}

fn default_repo_type() -> String {
    "dataset".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalTableLoaderConfig {
    pub conn_config: ConnConfig,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_repo_defaults() {
        let json = serde_json::json!({
            "type": "huggingFace",
            "config": {
                "connConfig": {"type": "datasetRepo", "config": {"accessToken": "hf_x"}},
                "repoId": "org/data"
            }
        });
        let loader: LoaderConfig = serde_json::from_value(json).unwrap();
        let LoaderConfig::DatasetRepo(cfg) = &loader else {
            panic!("expected dataset repo");
        };
        assert_eq!(cfg.repo_type, "dataset");
        assert_eq!(cfg.revision, "main");
        assert_eq!(loader.conn_config().type_tag(), "datasetRepo");
    }

    #[test]
    fn unknown_tag_is_rejected_by_serde() {
        let json = serde_json::json!({"type": "ftp", "config": {}});
        assert!(serde_json::from_value::<LoaderConfig>(json).is_err());
    }
}
