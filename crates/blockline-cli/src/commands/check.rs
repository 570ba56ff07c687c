use std::path::Path;

use anyhow::Result;
use blockline_engine::orchestrator;

/// Execute the `check` command: validate a pipeline and print its stage plan
/// without contacting any external system.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    let doc = super::load(pipeline_path)?;
    println!("Pipeline structure: OK");

    let run_name = super::run_name(&doc, None, pipeline_path);
    let plan = orchestrator::check_pipeline(&doc.config, &run_name)?;

    println!("{:18} {}", "Run name:", plan.run_name);
    println!("{:18} {}", "Transfer mode:", plan.transfer_mode);
    println!("{:18} {}", "Extractor:", plan.extractor);
    println!("{:18} {}", "Loader:", plan.loader);
    let stages: Vec<&str> = plan.stages.iter().map(|s| s.as_str()).collect();
    println!("{:18} {}", "Stages:", stages.join(" -> "));
    for warning in &plan.warnings {
        println!("{:18} {}", "Warning:", warning);
    }

    println!("\nAll checks passed.");
    Ok(())
}
