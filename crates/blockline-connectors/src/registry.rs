//! Static mapping from configuration `type` tags to connector implementations.
//!
//! Resolution happens in two steps: the tag is looked up first (an unknown
//! tag is `UnsupportedType`), then the body is parsed and checked by the
//! variant itself (a malformed body is `ConfigValidation`).

use blockline_types::{ConnConfig, ConnectorError, ExtConfig, LoaderConfig};
use serde_json::Value;

use crate::codec::FileCodec;
use crate::extract::{Extractor, ObjectStorageExtractor, RelationalTableExtractor};
use crate::load::{DatasetRepoLoader, Loader, ObjectStorageLoader, RelationalTableLoader};
use crate::template::RenderContext;

/// Split `{ type, config }` into the tag and its body.
fn tagged<'a>(kind: &str, raw: &'a Value) -> Result<(&'a str, &'a Value), ConnectorError> {
    let tag = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnectorError::config(format!("{kind} is missing a string 'type'")))?;
    let body = raw
        .get("config")
        .ok_or_else(|| ConnectorError::config(format!("{kind} '{tag}' is missing 'config'")))?;
    Ok((tag, body))
}

/// # Errors
///
/// `UnsupportedType` for an unknown tag, `ConfigValidation` for a bad body.
pub fn resolve_conn_config(raw: &Value) -> Result<ConnConfig, ConnectorError> {
    let (tag, _) = tagged("connection", raw)?;
    if !ConnConfig::TYPE_TAGS.contains(&tag) {
        return Err(ConnectorError::unsupported("connection", tag));
    }
    let conn: ConnConfig = serde_json::from_value(raw.clone())
        .map_err(|e| ConnectorError::config(format!("{tag} connection: {e}")))?;
    if let ConnConfig::Relational(pg) = &conn {
        pg.validate()?;
    }
    Ok(conn)
}

/// # Errors
///
/// `UnsupportedType` for an unknown tag, `ConfigValidation` for a bad body.
pub fn resolve_ext_config(raw: &Value) -> Result<ExtConfig, ConnectorError> {
    let (tag, body) = tagged("extractor", raw)?;
    match tag {
        "objectStorage" | "awsStorage" => Ok(ExtConfig::ObjectStorage(
            ObjectStorageExtractor::validate_config(body)?,
        )),
        "relationalTable" | "postgresTable" => Ok(ExtConfig::RelationalTable(
            RelationalTableExtractor::validate_config(body)?,
        )),
        other => Err(ConnectorError::unsupported("extractor", other)),
    }
}

/// # Errors
///
/// `UnsupportedType` for an unknown tag, `ConfigValidation` for a bad body.
pub fn resolve_loader_config(raw: &Value) -> Result<LoaderConfig, ConnectorError> {
    let (tag, body) = tagged("loader", raw)?;
    match tag {
        "objectStorage" | "awsStorage" => Ok(LoaderConfig::ObjectStorage(
            ObjectStorageLoader::validate_config(body)?,
        )),
        "datasetRepo" | "huggingFace" => Ok(LoaderConfig::DatasetRepo(
            DatasetRepoLoader::validate_config(body)?,
        )),
        "relationalTable" | "postgresTable" => Ok(LoaderConfig::RelationalTable(
            RelationalTableLoader::validate_config(body)?,
        )),
        other => Err(ConnectorError::unsupported("loader", other)),
    }
}

/// Build the extractor for `config`. No external system is contacted.
///
/// # Errors
///
/// Returns `ConfigValidation` if templates cannot be rendered.
pub fn build_extractor(
    config: &ExtConfig,
    ctx: &RenderContext,
) -> Result<Box<dyn Extractor>, ConnectorError> {
    Ok(match config {
        ExtConfig::ObjectStorage(c) => Box::new(ObjectStorageExtractor::new(c, ctx)?),
        ExtConfig::RelationalTable(c) => Box::new(RelationalTableExtractor::new(c)),
    })
}

/// Build the loader for `config`. No external system is contacted.
///
/// # Errors
///
/// Returns `ConfigValidation` if templates cannot be rendered.
pub fn build_loader(
    config: &LoaderConfig,
    ctx: &RenderContext,
) -> Result<Box<dyn Loader>, ConnectorError> {
    Ok(match config {
        LoaderConfig::ObjectStorage(c) => Box::new(ObjectStorageLoader::new(c, ctx)?),
        LoaderConfig::DatasetRepo(c) => Box::new(DatasetRepoLoader::new(c, ctx)?),
        LoaderConfig::RelationalTable(c) => Box::new(RelationalTableLoader::new(c)),
    })
}

/// Codec for extractors whose blocks carry files; `None` for table sources.
#[must_use]
pub fn file_codec(config: &ExtConfig) -> Option<FileCodec> {
    match config {
        ExtConfig::ObjectStorage(c) => Some(ObjectStorageExtractor::file_codec(c)),
        ExtConfig::RelationalTable(_) => None,
    }
}
