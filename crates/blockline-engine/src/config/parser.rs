//! Pipeline YAML parsing with environment variable substitution and
//! connector resolution.
//!
//! A document is read in three passes: `${VAR}` references are substituted
//! in the raw text, the YAML is loaded as a generic tree, and then every
//! `type` tag is resolved through the connector registry before the typed
//! [`PipelineConfig`] is built. Named connectors referenced by string from
//! `connConfig` are inlined during the last pass.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use blockline_connectors::registry::{resolve_conn_config, resolve_ext_config, resolve_loader_config};
use blockline_types::{ConnectorError, PipelineConfig};
use regex::Regex;
use serde_json::{Map, Value};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// A parsed pipeline file.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    /// Document format version; only `1.0` is accepted by validation.
    pub version: String,
    /// Default run name.
    pub pipeline: Option<String>,
    pub config: PipelineConfig,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => result = result.replace(&cap[0], &val),
            Err(_) => {
                if !missing.iter().any(|m| m == var_name) {
                    missing.push(var_name.to_string());
                }
            }
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result)
}

/// Parse a pipeline YAML string.
///
/// # Errors
///
/// Returns an error if substitution fails, the YAML is malformed, or
/// resolution fails. Resolution failures carry a [`ConnectorError`] that can
/// be recovered with `downcast_ref`.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineDocument> {
    let substituted = substitute_env_vars(yaml_str)?;
    let raw: Value = serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;
    let doc = resolve_document(raw)?;
    Ok(doc)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn parse_pipeline(path: &Path) -> Result<PipelineDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content).with_context(|| format!("Invalid pipeline file: {}", path.display()))
}

/// Build a [`PipelineDocument`] from an already-loaded tree.
///
/// # Errors
///
/// Returns `UnsupportedType` for an unknown `type` tag and
/// `ConfigValidation` for anything else that does not fit.
pub fn resolve_document(raw: Value) -> Result<PipelineDocument, ConnectorError> {
    let Value::Object(mut doc) = raw else {
        return Err(ConnectorError::config("pipeline document must be a mapping"));
    };

    let version = match doc.remove("version") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(ConnectorError::config(format!("version must be a string, got {other}")))
        }
    };
    let pipeline = match doc.remove("pipeline") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            return Err(ConnectorError::config(format!("pipeline must be a string, got {other}")))
        }
    };
    let connectors = resolve_connectors(doc.remove("connectors"))?;

    let ext_raw = section(&mut doc, "extConfig", &connectors)?;
    let ext = resolve_ext_config(&ext_raw).map_err(within("extConfig"))?;
    let loader_raw = section(&mut doc, "loaderConfig", &connectors)?;
    let loader = resolve_loader_config(&loader_raw).map_err(within("loaderConfig"))?;

    doc.insert("extConfig".to_string(), to_value(&ext)?);
    doc.insert("loaderConfig".to_string(), to_value(&loader)?);
    let config: PipelineConfig = serde_json::from_value(Value::Object(doc))
        .map_err(|e| ConnectorError::config(format!("pipeline: {e}")))?;

    Ok(PipelineDocument {
        version,
        pipeline,
        config,
    })
}

/// Resolve the named connector registry into normalised connection trees.
fn resolve_connectors(raw: Option<Value>) -> Result<BTreeMap<String, Value>, ConnectorError> {
    let entries = match raw {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(entries)) => entries,
        Some(_) => return Err(ConnectorError::config("connectors must be a mapping of name to connection")),
    };
    entries
        .into_iter()
        .map(|(name, value)| {
            let conn = resolve_conn_config(&value).map_err(within(&format!("connector '{name}'")))?;
            Ok((name, to_value(&conn)?))
        })
        .collect()
}

/// Take `key` out of the document with its `connConfig` resolved.
fn section(
    doc: &mut Map<String, Value>,
    key: &str,
    connectors: &BTreeMap<String, Value>,
) -> Result<Value, ConnectorError> {
    let mut value = doc
        .remove(key)
        .ok_or_else(|| ConnectorError::config(format!("missing required field '{key}'")))?;
    let slot = value
        .get_mut("config")
        .and_then(|body| body.get_mut("connConfig"));
    if let Some(slot) = slot {
        let resolved = match &*slot {
            Value::String(name) => connectors.get(name).cloned().ok_or_else(|| {
                ConnectorError::config(format!("{key}: unknown connector '{name}'"))
            })?,
            inline => to_value(&resolve_conn_config(inline).map_err(within(key))?)?,
        };
        *slot = resolved;
    }
    Ok(value)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ConnectorError> {
    serde_json::to_value(value).map_err(|e| ConnectorError::config(format!("cannot normalise configuration: {e}")))
}

/// Prefix validation messages with where they came from; other kinds pass
/// through untouched.
fn within(place: &str) -> impl Fn(ConnectorError) -> ConnectorError + '_ {
    move |err| match err {
        ConnectorError::ConfigValidation(msg) => ConnectorError::config(format!("{place}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockline_types::conn::StorageProvider;
    use blockline_types::{ConnConfig, ExtConfig, LoaderConfig, TransferMode};

    const PIPELINE: &str = r#"
version: "1.0"
pipeline: nightly
connectors:
  lake:
    type: awsStorage
    config: {provider: local, root: /tmp/lake}
extName: landing
extConfig:
  type: objectStorage
  config:
    connConfig: lake
    bucketName: raw
    prefix: "events/{{ execution_time.strftime('%Y%m%d') }}"
    pathGlobFilter: "*.csv"
    fileType: csv
loaderConfig:
  type: objectStorage
  config:
    connConfig: {type: objectStorage, config: {provider: local, root: /tmp/out}}
    bucketName: curated
transferMode: table
transformSql: SELECT * FROM data
resources:
  queueCapacity: 4
"#;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BL_TEST_HOST", "db.internal");
        let out = substitute_env_vars("host: ${BL_TEST_HOST}\nport: 5432").unwrap();
        assert_eq!(out, "host: db.internal\nport: 5432");
        std::env::remove_var("BL_TEST_HOST");
    }

    #[test]
    fn test_missing_env_vars_all_reported_once() {
        let err = substitute_env_vars("${BL_MISSING_X} ${BL_MISSING_Y} ${BL_MISSING_X}")
            .unwrap_err()
            .to_string();
        assert_eq!(err, "Missing environment variable(s): BL_MISSING_X, BL_MISSING_Y");
    }

    #[test]
    fn test_named_connector_is_inlined() {
        let doc = parse_pipeline_str(PIPELINE).unwrap();
        assert_eq!(doc.version, "1.0");
        assert_eq!(doc.pipeline.as_deref(), Some("nightly"));
        let ExtConfig::ObjectStorage(ext) = &doc.config.ext_config else {
            panic!("expected object storage extractor");
        };
        let ConnConfig::ObjectStorage(conn) = &ext.conn_config else {
            panic!("expected object storage connection");
        };
        assert_eq!(conn.provider, StorageProvider::Local);
        assert_eq!(conn.root.as_deref(), Some("/tmp/lake"));
        assert!(matches!(doc.config.loader_config, LoaderConfig::ObjectStorage(_)));
        assert_eq!(doc.config.transfer_mode, TransferMode::Table);
        assert_eq!(doc.config.resources.queue_capacity, 4);
        assert_eq!(doc.config.ext_name_value(), "landing");
    }

    #[test]
    fn test_unknown_connector_name() {
        let yaml = PIPELINE.replace("connConfig: lake", "connConfig: warehouse");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        let conn_err = err.downcast_ref::<ConnectorError>().unwrap();
        assert!(conn_err.to_string().contains("unknown connector 'warehouse'"));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let yaml = PIPELINE.replace("type: objectStorage\n  config:\n    connConfig: lake", "type: ftp\n  config:\n    connConfig: lake");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::UnsupportedType { kind: "extractor", .. })
        ));
    }

    #[test]
    fn test_unknown_connection_type_is_unsupported() {
        let yaml = PIPELINE.replace("type: awsStorage", "type: mongo");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::UnsupportedType { kind: "connection", .. })
        ));
    }

    #[test]
    fn test_malformed_body_is_validation_error() {
        let yaml = PIPELINE.replace("bucketName: raw", "bucketName: [raw]");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        let conn_err = err.downcast_ref::<ConnectorError>().unwrap();
        assert!(matches!(conn_err, ConnectorError::ConfigValidation(msg) if msg.starts_with("extConfig: ")));
    }

    #[test]
    fn test_missing_transfer_mode() {
        let yaml = PIPELINE.replace("transferMode: table\n", "");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        assert!(err.downcast_ref::<ConnectorError>().unwrap().is_config());
        assert!(format!("{err:#}").contains("transferMode"));
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let err = parse_pipeline_str("this is not: [valid: yaml: {{{}}}").unwrap_err();
        assert!(err.to_string().contains("Failed to parse pipeline YAML"));
    }

    #[test]
    fn test_parse_pipeline_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, PIPELINE).unwrap();
        let doc = parse_pipeline(&path).unwrap();
        assert_eq!(doc.pipeline.as_deref(), Some("nightly"));

        let err = parse_pipeline(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read pipeline file"));
    }
}
