use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use serde_json::Value;
use tracing::info;

use taskgrid_core::config::OrchestratorConfig;
use taskgrid_core::datacontract::InMemoryContractStore;
use taskgrid_core::domain::{ExecutionContext, Workflow, WorkflowExecutionStatus};
use taskgrid_core::external::file_store::InMemoryFileStore;
use taskgrid_core::external::repository::{
    InMemoryExecutionRepository, InMemoryProgramRepository, InMemoryVersionRepository, InMemoryWorkflowExecutionRepository, InMemoryWorkflowRepository,
};
use taskgrid_core::program::ProgramExecutionEngine;
use taskgrid_core::queue::TaskQueue;
use taskgrid_core::runner::RunnerRegistry;
use taskgrid_core::scheduler::WorkflowScheduler;
use taskgrid_core::streaming::StreamingHub;
use taskgrid_core::ui_session::UiSessionManager;

#[derive(Args)]
pub struct RunWorkflowArgs {
    /// Path to a JSON workflow definition.
    #[arg(long)]
    file: PathBuf,

    /// JSON object merged into the execution's user inputs.
    #[arg(long, default_value = "{}")]
    inputs: String,

    /// Identity recorded as the execution's initiator.
    #[arg(long, default_value = "cli")]
    user: String,
}

pub async fn run(config: OrchestratorConfig, args: RunWorkflowArgs) -> Result<()> {
    let definition = std::fs::read_to_string(&args.file)?;
    let workflow: Workflow = serde_json::from_str(&definition)?;
    let user_inputs: Value = serde_json::from_str(&args.inputs)?;
    let user_inputs = match user_inputs {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => Default::default(),
        other => bail!("--inputs must be a JSON object, got {other}"),
    };

    let file_store = Arc::new(InMemoryFileStore::new());
    let program_repo = Arc::new(InMemoryProgramRepository::new());
    let version_repo = Arc::new(InMemoryVersionRepository::new());
    let execution_repo = Arc::new(InMemoryExecutionRepository::new());
    let workflow_repo = Arc::new(InMemoryWorkflowRepository::new());
    let workflow_execution_repo = Arc::new(InMemoryWorkflowExecutionRepository::new());
    let contract_store = Arc::new(InMemoryContractStore::new());
    let runners = Arc::new(RunnerRegistry::with_defaults());
    let hub = Arc::new(StreamingHub::new());
    let ui_sessions = UiSessionManager::new();
    ui_sessions.spawn_timeout_sweep(Duration::from_secs(config.general.streaming_grace_seconds));

    let (queue, worker) = TaskQueue::new(config.concurrency.queue_depth);
    let worker_handle = tokio::spawn(worker.run());

    let engine = ProgramExecutionEngine::new(
        config.clone(),
        file_store,
        program_repo,
        version_repo,
        execution_repo,
        runners,
        Arc::clone(&hub),
        Arc::clone(&queue),
    );

    let workflow_id = workflow.id;
    workflow_repo.put(workflow, None).await?;

    let scheduler = WorkflowScheduler::new(
        config,
        workflow_repo,
        workflow_execution_repo,
        engine,
        contract_store,
        ui_sessions,
        Arc::clone(&hub),
        Arc::clone(&queue),
    );

    let context = ExecutionContext {
        user_inputs,
        ..ExecutionContext::default()
    };
    let eid = scheduler.execute(workflow_id, args.user, context).await?;
    info!(%eid, "dispatched workflow execution");

    loop {
        let status = scheduler.status(eid).await?;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let execution = scheduler.result(eid).await?;
    println!("status: {:?}", execution.status);
    println!(
        "progress: {}/{} completed, {} failed, {} skipped",
        execution.progress.completed, execution.progress.total_nodes, execution.progress.failed, execution.progress.skipped
    );
    println!("final outputs: {}", serde_json::to_string_pretty(&execution.results.final_outputs)?);
    if let Some(err) = &execution.error {
        eprintln!("error: {err}");
    }

    queue.shutdown();
    worker_handle.await?;

    if matches!(execution.status, WorkflowExecutionStatus::Failed | WorkflowExecutionStatus::Timeout) {
        bail!("workflow execution ended in status {:?}", execution.status);
    }
    Ok(())
}
