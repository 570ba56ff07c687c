pub mod check;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use blockline_engine::config::{parse_pipeline, validate_document};
use blockline_engine::PipelineDocument;

/// Parse and validate a pipeline file, logging any warnings.
fn load(pipeline_path: &Path) -> Result<PipelineDocument> {
    let doc = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    let warnings = validate_document(&doc)?;
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    Ok(doc)
}

/// Run name from the command line, else the document, else the file stem.
fn run_name(doc: &PipelineDocument, explicit: Option<String>, pipeline_path: &Path) -> String {
    explicit
        .or_else(|| doc.pipeline.clone())
        .or_else(|| {
            pipeline_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "pipeline".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockline_engine::config::resolve_document;
    use serde_json::json;

    fn doc(name: Option<&str>) -> PipelineDocument {
        let mut raw = json!({
            "version": "1.0",
            "extConfig": {"type": "objectStorage", "config": {
                "connConfig": {"type": "objectStorage", "config": {}}, "bucketName": "a"}},
            "loaderConfig": {"type": "objectStorage", "config": {
                "connConfig": {"type": "objectStorage", "config": {}}, "bucketName": "b"}},
            "transferMode": "copyFile"
        });
        if let Some(name) = name {
            raw["pipeline"] = json!(name);
        }
        resolve_document(raw).unwrap()
    }

    #[test]
    fn run_name_precedence() {
        let path = Path::new("/etc/pipelines/orders.yaml");
        assert_eq!(run_name(&doc(Some("doc")), Some("cli".into()), path), "cli");
        assert_eq!(run_name(&doc(Some("doc")), None, path), "doc");
        assert_eq!(run_name(&doc(None), None, path), "orders");
    }
}
