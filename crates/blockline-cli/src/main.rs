mod commands;
mod logging;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blockline",
    version,
    about = "Staged extract, transform and load pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline to completion
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Run name used for lineage (default: the file's `pipeline` field)
        #[arg(long)]
        run_name: Option<String>,
        /// Execution time for path templates, RFC 3339 (default: wildcard)
        #[arg(long)]
        execution_time: Option<DateTime<Utc>>,
    },
    /// Parse and validate a pipeline and print its stage plan
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level)?;

    match cli.command {
        Commands::Run {
            pipeline,
            run_name,
            execution_time,
        } => commands::run::execute(&pipeline, run_name, execution_time).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
    }
}
