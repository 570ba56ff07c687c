use std::path::Path;

use anyhow::Result;
use blockline_engine::orchestrator;
use chrono::{DateTime, Utc};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(
    pipeline_path: &Path,
    run_name: Option<String>,
    execution_time: Option<DateTime<Utc>>,
) -> Result<()> {
    let doc = super::load(pipeline_path)?;
    let run_name = super::run_name(&doc, run_name, pipeline_path);

    tracing::info!(
        pipeline = %run_name,
        extractor = doc.config.ext_config.type_tag(),
        loader = doc.config.loader_config.type_tag(),
        transfer_mode = %doc.config.transfer_mode,
        "Pipeline validated"
    );

    let report = orchestrator::run_pipeline(&doc.config, &run_name, execution_time).await?;

    println!("Pipeline '{}' completed successfully.", report.run_name);
    println!("  Transfer mode:      {}", report.transfer_mode);
    println!("  Blocks extracted:   {}", report.blocks_extracted);
    if report.blocks_transformed > 0 {
        println!("  Blocks transformed: {}", report.blocks_transformed);
    }
    println!("  Blocks loaded:      {}", report.blocks_loaded);
    println!("  Rows loaded:        {}", report.rows_loaded);
    println!("  Bytes loaded:       {}", format_bytes(report.bytes_loaded));
    println!("  Duration:           {:.2}s", report.duration_secs);

    // Machine-readable summary for schedulers
    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}

const UNITS: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];

fn format_bytes(bytes: u64) -> String {
    UNITS
        .iter()
        .find(|(size, _)| bytes >= *size)
        .map_or_else(
            || format!("{bytes} B"),
            |(size, unit)| format!("{:.2} {unit}", bytes as f64 / *size as f64),
        )
}
