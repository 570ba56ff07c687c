//! Semantic validation of a resolved pipeline, run before any worker starts.

use blockline_connectors::registry::{resolve_ext_config, resolve_loader_config};
use blockline_connectors::{Extractor, Loader};
use blockline_types::{ConnectorError, PipelineConfig, TransferMode};

use super::parser::PipelineDocument;

pub const SUPPORTED_VERSION: &str = "1.0";

/// Validate a parsed document, including its format version.
///
/// Returns warnings for settings that are accepted but have no effect.
///
/// # Errors
///
/// Returns `ConfigValidation` listing every problem found.
pub fn validate_document(doc: &PipelineDocument) -> Result<Vec<String>, ConnectorError> {
    let mut errors = Vec::new();
    if doc.version != SUPPORTED_VERSION {
        errors.push(format!(
            "unsupported pipeline version '{}', expected '{SUPPORTED_VERSION}'",
            doc.version
        ));
    }
    if doc.pipeline.as_deref().is_some_and(|name| name.trim().is_empty()) {
        errors.push("pipeline name must not be blank".to_string());
    }
    let (mut config_errors, warnings) = check(&doc.config);
    errors.append(&mut config_errors);
    finish(errors, warnings)
}

/// Validate a resolved pipeline configuration.
///
/// # Errors
///
/// Returns `ConfigValidation` listing every problem found.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<Vec<String>, ConnectorError> {
    let (errors, warnings) = check(config);
    finish(errors, warnings)
}

/// Check the built stages against the transfer mode.
///
/// # Errors
///
/// Returns `ConfigValidation` if copy-file mode is requested with a stage
/// that cannot pass raw files through.
pub fn validate_stages(
    config: &PipelineConfig,
    extractor: &dyn Extractor,
    loader: &dyn Loader,
) -> Result<(), ConnectorError> {
    if config.transfer_mode != TransferMode::CopyFile {
        return Ok(());
    }
    let mut errors = Vec::new();
    if !extractor.is_compatible_with_copy_file() {
        errors.push(format!(
            "extractor '{}' is not compatible with copyFile transfer mode",
            extractor.type_tag()
        ));
    }
    if !loader.is_compatible_with_copy_file() {
        errors.push(format!(
            "loader '{}' is not compatible with copyFile transfer mode",
            loader.type_tag()
        ));
    }
    finish(errors, Vec::new()).map(|_| ())
}

fn check(config: &PipelineConfig) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.resources.queue_capacity == 0 {
        errors.push("resources.queueCapacity must be >= 1".to_string());
    }
    if config.resources.poll_interval_ms == 0 {
        errors.push("resources.pollIntervalMs must be >= 1".to_string());
    }
    if config.private_field_prefix.trim().is_empty() {
        errors.push("privateFieldPrefix must not be empty".to_string());
    }
    if config.transform_sql.as_deref().is_some_and(|sql| sql.trim().is_empty()) {
        errors.push("transformSql must not be blank".to_string());
    }
    if config.ext_name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        errors.push("extName must not be blank".to_string());
    }

    // Configs built in code skip the registry, so run the variant checks here.
    match serde_json::to_value(&config.ext_config) {
        Ok(raw) => {
            if let Err(e) = resolve_ext_config(&raw) {
                errors.push(format!("extConfig: {e}"));
            }
        }
        Err(e) => errors.push(format!("extConfig: {e}")),
    }
    match serde_json::to_value(&config.loader_config) {
        Ok(raw) => {
            if let Err(e) = resolve_loader_config(&raw) {
                errors.push(format!("loaderConfig: {e}"));
            }
        }
        Err(e) => errors.push(format!("loaderConfig: {e}")),
    }

    if config.transfer_mode == TransferMode::CopyFile {
        if config.transform_sql.is_some() {
            warnings.push("transformSql is ignored in copyFile transfer mode".to_string());
        }
        if !config.include_private_fields.is_empty() {
            warnings.push("includePrivateFields is ignored in copyFile transfer mode".to_string());
        }
        if config.tag_name_value.is_some() {
            warnings.push("tagNameValue is ignored in copyFile transfer mode".to_string());
        }
    }

    (errors, warnings)
}

fn finish(errors: Vec<String>, warnings: Vec<String>) -> Result<Vec<String>, ConnectorError> {
    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConnectorError::config(format!(
            "pipeline validation failed: {}",
            errors.join("; ")
        )))
    }
}
