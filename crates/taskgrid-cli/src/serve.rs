use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use taskgrid_core::config::OrchestratorConfig;
use taskgrid_core::datacontract::InMemoryContractStore;
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

/// Wires up every component and blocks until `Ctrl-C`. There is no
/// persistence layer in scope, so state held this way lives only as long
/// as the process does; this mirrors a long-running host, not a durable
/// scheduler.
pub async fn run(config: OrchestratorConfig) -> Result<()> {
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
    ui_sessions.spawn_timeout_sweep(Duration::from_secs(5));

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

    let _scheduler = WorkflowScheduler::new(config, workflow_repo, workflow_execution_repo, engine, contract_store, ui_sessions, hub, Arc::clone(&queue));

    info!("taskgrid orchestrator running, waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining background task queue");

    queue.shutdown();
    worker_handle.await?;
    Ok(())
}
