//! Connector error taxonomy shared by every stage.

/// Errors raised by connection pools, extractors, loaders and the transformer.
///
/// The owning stage records the rendered message in the shared run state; the
/// variant decides which stage category the failure belongs to.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A configuration object failed schema or semantic validation.
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// A type discriminator is not present in the registry.
    #[error("unsupported {kind} type '{tag}'")]
    UnsupportedType { kind: &'static str, tag: String },

    /// A pool could not create or check out a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// An extractor failed while reading from its source.
    #[error("extract error: {0}")]
    Extract(String),

    /// The transformer failed while decoding, enriching or querying a block.
    #[error("transform error: {0}")]
    Transform(String),

    /// A loader failed while writing to its destination.
    #[error("load error: {0}")]
    Load(String),

    /// A file payload could not be decoded or a table could not be encoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    pub fn unsupported(kind: &'static str, tag: impl Into<String>) -> Self {
        Self::UnsupportedType {
            kind,
            tag: tag.into(),
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn extract(msg: impl Into<String>) -> Self {
        Self::Extract(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Whether the error was raised while validating configuration, before
    /// any worker could have been started.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigValidation(_) | Self::UnsupportedType { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_names_kind_and_tag() {
        let err = ConnectorError::unsupported("extractor", "ftp");
        assert_eq!(err.to_string(), "unsupported extractor type 'ftp'");
        assert!(err.is_config());
    }

    #[test]
    fn stage_errors_are_not_config_errors() {
        assert!(!ConnectorError::extract("boom").is_config());
        assert!(!ConnectorError::load("boom").is_config());
        assert!(ConnectorError::config("bad").is_config());
    }

    #[test]
    fn display_prefixes_category() {
        let err = ConnectorError::connection("refused");
        assert_eq!(err.to_string(), "connection error: refused");
        let err = ConnectorError::codec("not parquet");
        assert!(err.to_string().starts_with("codec error"));
    }
}
