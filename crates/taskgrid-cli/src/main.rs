mod doctor;
mod queue_status;
mod run_program;
mod run_workflow;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "taskgrid", version, about = "Program/workflow execution orchestrator")]
struct Cli {
    /// Path to a taskgrid.toml config file. Defaults to ./taskgrid.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background task queue worker and wait for a shutdown signal.
    Serve,
    /// Check that configured language runtimes, the sandbox root, and the
    /// config file are all usable.
    Doctor,
    /// Materialize a single-file program and run it to completion.
    RunProgram(run_program::RunProgramArgs),
    /// Load a workflow definition and run its DAG to completion.
    RunWorkflow(run_workflow::RunWorkflowArgs),
    /// Report the background task queue's configured and available capacity.
    QueueStatus,
}

fn load_config(path: Option<&PathBuf>) -> Result<taskgrid_core::config::OrchestratorConfig> {
    match path {
        Some(p) => Ok(taskgrid_core::config::OrchestratorConfig::load(p)?),
        None => Ok(taskgrid_core::config::OrchestratorConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    taskgrid_core::init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Serve => serve::run(config).await,
        Command::Doctor => doctor::run(config),
        Command::RunProgram(args) => run_program::run(config, args).await,
        Command::RunWorkflow(args) => run_workflow::run(config, args).await,
        Command::QueueStatus => queue_status::run(config).await,
    }
}
