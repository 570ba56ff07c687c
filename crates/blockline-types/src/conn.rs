//! Connection configuration variants.
//!
//! A [`ConnConfig`] is adjacently tagged: `{ type: <tag>, config: {...} }`.
//! The tag set is closed; [`ConnConfig::TYPE_TAGS`] lists every accepted
//! spelling so callers can reject unknown tags before parsing the body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Connection configuration for one external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum ConnConfig {
    #[serde(rename = "objectStorage", alias = "awsStorage")]
    ObjectStorage(ObjectStorageConnConfig),
    #[serde(rename = "relational", alias = "postgres")]
    Relational(RelationalConnConfig),
    #[serde(rename = "datasetRepo", alias = "huggingFace")]
    DatasetRepo(DatasetRepoConnConfig),
    #[serde(rename = "distributedSql", alias = "spark")]
    DistributedSql(DistributedSqlConnConfig),
}

impl ConnConfig {
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "objectStorage",
        "awsStorage",
        "relational",
        "postgres",
        "datasetRepo",
        "huggingFace",
        "distributedSql",
        "spark",
    ];

    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ObjectStorage(_) => "objectStorage",
            Self::Relational(_) => "relational",
            Self::DatasetRepo(_) => "datasetRepo",
            Self::DistributedSql(_) => "distributedSql",
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` if this is not an object storage connection.
    pub fn as_object_storage(&self, owner: &str) -> Result<&ObjectStorageConnConfig, ConnectorError> {
        match self {
            Self::ObjectStorage(c) => Ok(c),
            other => Err(mismatch(owner, "objectStorage", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` if this is not a relational connection.
    pub fn as_relational(&self, owner: &str) -> Result<&RelationalConnConfig, ConnectorError> {
        match self {
            Self::Relational(c) => Ok(c),
            other => Err(mismatch(owner, "relational", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` if this is not a dataset repository connection.
    pub fn as_dataset_repo(&self, owner: &str) -> Result<&DatasetRepoConnConfig, ConnectorError> {
        match self {
            Self::DatasetRepo(c) => Ok(c),
            other => Err(mismatch(owner, "datasetRepo", other)),
        }
    }
}

fn mismatch(owner: &str, expected: &str, got: &ConnConfig) -> ConnectorError {
    ConnectorError::config(format!(
        "{owner} requires a '{expected}' connection, got '{}'",
        got.type_tag()
    ))
}

/// Backing service of an object storage connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    S3,
    /// Local directory tree; buckets are sub-directories of `root`.
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageConnConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalConnConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_one")]
    pub max_conn: u32,
    #[serde(default = "default_one")]
    pub min_conn: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl RelationalConnConfig {
    /// Number of connections kept open for reuse between checkouts.
    #[must_use]
    pub fn idle_slots(&self) -> usize {
        self.max_conn.saturating_sub(self.min_conn) as usize
    }

    /// `host:port/database`, safe to log.
    #[must_use]
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// # Errors
    ///
    /// Returns `ConfigValidation` when pool bounds are inconsistent.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::config("relational connection: host must not be empty"));
        }
        if self.max_conn == 0 {
            return Err(ConnectorError::config("relational connection: maxConn must be >= 1"));
        }
        if self.max_conn < self.min_conn {
            return Err(ConnectorError::config(format!(
                "relational connection: maxConn ({}) must be >= minConn ({})",
                self.max_conn, self.min_conn
            )));
        }
        Ok(())
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_one() -> u32 {
    1
}

fn default_acquire_timeout_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRepoConnConfig {
    pub access_token: String,
    #[serde(default = "default_hub_endpoint")]
    pub endpoint: String,
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedSqlConnConfig {
    /// `sc://host:port` selects a remote session endpoint; anything else is a
    /// cluster master URL.
    pub dsn: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub conf: BTreeMap<String, String>,
}

fn default_app_name() -> String {
    "blockline".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adjacently_tagged_relational() {
        let json = serde_json::json!({
            "type": "postgres",
            "config": {"host": "db", "user": "etl", "database": "warehouse", "maxConn": 4}
        });
        let conn: ConnConfig = serde_json::from_value(json).unwrap();
        let ConnConfig::Relational(pg) = &conn else {
            panic!("expected relational, got {conn:?}");
        };
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.min_conn, 1);
        assert_eq!(pg.idle_slots(), 3);
        assert_eq!(conn.type_tag(), "relational");
    }

    #[test]
    fn relational_rejects_inverted_bounds() {
        let pg = RelationalConnConfig {
            host: "db".into(),
            port: 5432,
            user: "u".into(),
            password: String::new(),
            database: "d".into(),
            max_conn: 1,
            min_conn: 2,
            acquire_timeout_secs: 10,
        };
        let err = pg.validate().unwrap_err();
        assert!(err.to_string().contains("maxConn"));
    }

    #[test]
    fn object_storage_defaults_to_s3() {
        let json = serde_json::json!({"type": "objectStorage", "config": {}});
        let conn: ConnConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            conn.as_object_storage("test").unwrap().provider,
            StorageProvider::S3
        );
    }

    #[test]
    fn accessor_mismatch_is_config_error() {
        let conn = ConnConfig::DatasetRepo(DatasetRepoConnConfig {
            access_token: "t".into(),
            endpoint: default_hub_endpoint(),
        });
        let err = conn.as_relational("relationalTable loader").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("datasetRepo"));
    }

    #[test]
    fn every_tag_spelling_is_listed() {
        for tag in ConnConfig::TYPE_TAGS {
            let json = serde_json::json!({"type": tag, "config": {}});
            let err = serde_json::from_value::<ConnConfig>(json)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            assert!(!err.contains("unknown variant"), "{tag}: {err}");
        }
    }
}
