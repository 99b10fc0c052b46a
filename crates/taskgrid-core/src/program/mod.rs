//! Program Execution Engine (C5): end-to-end orchestration of a single
//! program invocation. Generalizes the teacher's
//! `Orchestrator::race_single` run-lifecycle shape into a non-blocking
//! `execute()` that persists a running `Execution`, enqueues the actual
//! work through C10, and returns the `EID` immediately — the teacher's
//! `race_single` awaited the whole run to completion, which does not match
//! the public `execute(...) -> EID` contract, so this is a deliberate
//! redesign (see DESIGN.md).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::domain::execution::{ExecutionResults, ExecutionStatus, ResourceUsage};
use crate::domain::program::{Language, Program, UiComponent, Version};
use crate::domain::Execution;
use crate::error::{Result, TaskGridError};
use crate::external::{ExecutionRepository, FileStore, ProgramRepository, VersionRepository};
use crate::ids::ExecutionId;
use crate::queue::TaskQueue;
use crate::runner::{RunnerCommand, RunnerContext, RunnerRegistry};
use crate::sandbox::Sandbox;
use crate::streaming::{HubEvent, HubPayload, StreamingHub};
use crate::supervisor::{ExecutionSupervisor, SupervisorConfig, SupervisorEvent, SupervisorHandle};

/// Per-call overrides for a program execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub idle_timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
    pub env: HashMap<String, String>,
    pub ui_component: Option<UiComponent>,
}

/// Which kind of process `deploy_web_app` spawns in place of the language
/// runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebAppRunnerKind {
    StaticServe,
    ContainerLaunch,
}

#[derive(Debug, Clone)]
pub struct DeployWebAppOptions {
    pub kind: WebAppRunnerKind,
    pub port: u16,
    pub idle_timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
}

enum CommandSource {
    Runner { env: HashMap<String, String> },
    WebApp { kind: WebAppRunnerKind, port: u16 },
}

/// Tracks the in-flight pieces of a running execution so `stop`/`pause`/
/// `resume` can reach them without threading state through the background
/// task. Removed from the registry once the execution reaches a terminal
/// state.
struct ActiveExecution {
    handle: Mutex<Option<SupervisorHandle>>,
    pid: Mutex<Option<u32>>,
    paused: AtomicBool,
}

impl ActiveExecution {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            pid: Mutex::new(None),
            paused: AtomicBool::new(false),
        }
    }
}

/// Wires together C1 (Sandbox), C2 (RunnerRegistry), C3
/// (ExecutionSupervisor), C4 (StreamingHub), and C10 (TaskQueue) into the
/// pipeline spec.md §4.5 describes.
pub struct ProgramExecutionEngine {
    config: OrchestratorConfig,
    file_store: Arc<dyn FileStore>,
    program_repo: Arc<dyn ProgramRepository>,
    version_repo: Arc<dyn VersionRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    runners: Arc<RunnerRegistry>,
    hub: Arc<StreamingHub>,
    queue: Arc<TaskQueue>,
    active: Mutex<HashMap<ExecutionId, Arc<ActiveExecution>>>,
}

impl ProgramExecutionEngine {
    pub fn new(
        config: OrchestratorConfig,
        file_store: Arc<dyn FileStore>,
        program_repo: Arc<dyn ProgramRepository>,
        version_repo: Arc<dyn VersionRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        runners: Arc<RunnerRegistry>,
        hub: Arc<StreamingHub>,
        queue: Arc<TaskQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            file_store,
            program_repo,
            version_repo,
            execution_repo,
            runners,
            hub,
            queue,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Persists a `Running` execution, enqueues the actual run through C10,
    /// and returns its `EID` without waiting for the process to finish.
    pub async fn execute(
        self: &Arc<Self>,
        program_id: crate::ids::ProgramId,
        version_id: crate::ids::VersionId,
        user_id: impl Into<String>,
        parameters: Value,
        options: ExecuteOptions,
    ) -> Result<ExecutionId> {
        let program = self.program_repo.get(program_id).await?;
        let version = self.version_repo.get(version_id).await?;
        if !version.is_executable() {
            return Err(TaskGridError::Validation(format!(
                "version {} is not approved for execution",
                version.id
            )));
        }

        let execution = Execution::new(program_id, version_id, user_id, parameters.clone());
        let eid = execution.id;
        self.execution_repo.put(execution, None).await?;
        self.hub.create_topic(eid).await;
        self.active.lock().await.insert(eid, Arc::new(ActiveExecution::new()));

        let engine = Arc::clone(self);
        let source = CommandSource::Runner { env: options.env.clone() };
        let idle_timeout = options.idle_timeout;
        let hard_timeout = options.hard_timeout;
        let ui_component = options.ui_component.clone();

        self.queue.enqueue(Box::new(move |token| {
            Box::pin(async move {
                engine
                    .run(eid, program, version, parameters, ui_component, source, idle_timeout, hard_timeout, token)
                    .await;
            })
        }))?;

        Ok(eid)
    }

    /// Same pipeline as `execute`, but the spawned process is a
    /// static-file server or container launcher rather than a language
    /// runner. The exposed URL is published to C4 once `Started` fires.
    pub async fn deploy_web_app(
        self: &Arc<Self>,
        program_id: crate::ids::ProgramId,
        version_id: crate::ids::VersionId,
        user_id: impl Into<String>,
        parameters: Value,
        options: DeployWebAppOptions,
    ) -> Result<ExecutionId> {
        let program = self.program_repo.get(program_id).await?;
        let version = self.version_repo.get(version_id).await?;

        let execution = Execution::new(program_id, version_id, user_id, parameters.clone());
        let eid = execution.id;
        self.execution_repo.put(execution, None).await?;
        self.hub.create_topic(eid).await;
        self.active.lock().await.insert(eid, Arc::new(ActiveExecution::new()));

        let engine = Arc::clone(self);
        let source = CommandSource::WebApp { kind: options.kind, port: options.port };

        self.queue.enqueue(Box::new(move |token| {
            Box::pin(async move {
                engine
                    .run(eid, program, version, parameters, None, source, options.idle_timeout, options.hard_timeout, token)
                    .await;
            })
        }))?;

        Ok(eid)
    }

    pub async fn status(&self, eid: ExecutionId) -> Result<ExecutionStatus> {
        Ok(self.execution_repo.get(eid).await?.status)
    }

    pub async fn result(&self, eid: ExecutionId) -> Result<Execution> {
        self.execution_repo.get(eid).await
    }

    /// Returns (at most) the last `last_n` cached hub events for this
    /// execution, without subscribing to live traffic.
    pub async fn logs(&self, eid: ExecutionId, last_n: usize) -> Vec<HubEvent> {
        self.hub.recent(eid, last_n).await
    }

    pub async fn stop(&self, eid: ExecutionId) -> Result<()> {
        let active = self.active_for(eid).await?;
        let handle = active.handle.lock().await.take();
        match handle {
            Some(handle) => {
                handle.cancel();
                Ok(())
            }
            None => Err(TaskGridError::Validation(format!("execution {eid} has not started its process yet"))),
        }
    }

    pub async fn pause(&self, eid: ExecutionId) -> Result<()> {
        let active = self.active_for(eid).await?;
        let pid = active.pid.lock().await.ok_or_else(|| {
            TaskGridError::Validation(format!("execution {eid} has not started its process yet"))
        })?;
        if active.paused.swap(true, Ordering::SeqCst) {
            return Err(TaskGridError::Validation(format!("execution {eid} is already paused")));
        }
        send_pause_signal(pid)?;
        self.hub.publish(eid, HubPayload::Status("paused".into())).await;
        Ok(())
    }

    pub async fn resume(&self, eid: ExecutionId) -> Result<()> {
        let active = self.active_for(eid).await?;
        let pid = active.pid.lock().await.ok_or_else(|| {
            TaskGridError::Validation(format!("execution {eid} has not started its process yet"))
        })?;
        if !active.paused.swap(false, Ordering::SeqCst) {
            return Err(TaskGridError::Validation(format!("execution {eid} is not paused")));
        }
        send_resume_signal(pid)?;
        self.hub.publish(eid, HubPayload::Status("running".into())).await;
        Ok(())
    }

    async fn active_for(&self, eid: ExecutionId) -> Result<Arc<ActiveExecution>> {
        self.active
            .lock()
            .await
            .get(&eid)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("no active execution {eid}")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        self: Arc<Self>,
        eid: ExecutionId,
        program: Program,
        version: Version,
        parameters: Value,
        ui_component: Option<UiComponent>,
        source: CommandSource,
        idle_timeout: Option<Duration>,
        hard_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) {
        let sandbox_root = self.config.general.sandbox_root.join(eid.to_string());
        let sandbox = match Sandbox::materialize(self.file_store.as_ref(), &program, &version, ui_component.as_ref(), sandbox_root).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                self.finish_without_process(eid, ExecutionStatus::Failed, e.to_string()).await;
                return;
            }
        };

        let command = match self.build_command(&program, &version, &parameters, &source, sandbox.root().to_path_buf()) {
            Ok(command) => command,
            Err(e) => {
                let _ = sandbox.release().await;
                self.finish_without_process(eid, ExecutionStatus::Failed, e.to_string()).await;
                return;
            }
        };

        let node_timeout = Duration::from_secs(self.config.general.default_node_timeout_minutes * 60);
        let supervisor_config = SupervisorConfig {
            eid,
            idle_timeout: idle_timeout.unwrap_or(node_timeout),
            hard_timeout: hard_timeout.unwrap_or(node_timeout),
            max_output_bytes: 10 * 1024 * 1024,
        };
        let supervisor = ExecutionSupervisor::new(supervisor_config);

        let (mut events, handle) = match supervisor.spawn(command).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = sandbox.release().await;
                self.finish_without_process(eid, ExecutionStatus::Failed, e.to_string()).await;
                return;
            }
        };

        if let Some(active) = self.active.lock().await.get(&eid).cloned() {
            *active.handle.lock().await = Some(handle);
        }

        let (is_web_app, web_app_port) = match &source {
            CommandSource::WebApp { port, .. } => (true, Some(*port)),
            CommandSource::Runner { .. } => (false, None),
        };

        let mut stdout = String::new();
        let mut last_usage = ResourceUsage::default();
        let mut terminal: Option<(ExecutionStatus, ExecutionResults)> = None;
        let mut shutdown_handled = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !shutdown_handled => {
                    shutdown_handled = true;
                    if let Some(active) = self.active.lock().await.get(&eid).cloned() {
                        if let Some(handle) = active.handle.lock().await.take() {
                            handle.cancel();
                        }
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Some((status, results)) = self.handle_event(eid, event, &mut stdout, &mut last_usage, is_web_app, web_app_port).await {
                        terminal = Some((status, results));
                        break;
                    }
                }
            }
        }

        if let Err(e) = sandbox.release().await {
            warn!(%eid, error = %e, "failed to release sandbox after execution");
        }

        let (status, mut results) = terminal.unwrap_or_else(|| {
            (
                ExecutionStatus::Failed,
                ExecutionResults {
                    error: Some("process stream ended without a terminal event".into()),
                    ..Default::default()
                },
            )
        });
        if results.output.is_empty() {
            results.output = stdout;
        }

        self.finish(eid, status, results, last_usage).await;
        self.active.lock().await.remove(&eid);
        self.hub
            .schedule_teardown(eid, Duration::from_secs(self.config.general.streaming_grace_seconds));
    }

    /// Translates one `SupervisorEvent` into a published `HubPayload`,
    /// returning `Some((status, results))` once the event is terminal.
    async fn handle_event(
        &self,
        eid: ExecutionId,
        event: SupervisorEvent,
        stdout: &mut String,
        last_usage: &mut ResourceUsage,
        is_web_app: bool,
        web_app_port: Option<u16>,
    ) -> Option<(ExecutionStatus, ExecutionResults)> {
        match event {
            SupervisorEvent::Started { pid, .. } => {
                if let Some(active) = self.active.lock().await.get(&eid).cloned() {
                    *active.pid.lock().await = Some(pid);
                }
                self.hub.publish(eid, HubPayload::Started { pid: Some(pid) }).await;
                if is_web_app {
                    if let Some(port) = web_app_port {
                        self.hub
                            .publish(eid, HubPayload::Status(format!("url=http://localhost:{port}")))
                            .await;
                    }
                }
                None
            }
            SupervisorEvent::Stdout { line, .. } => {
                stdout.push_str(&line);
                stdout.push('\n');
                self.hub.publish(eid, HubPayload::Stdout(line)).await;
                None
            }
            SupervisorEvent::Stderr { line, .. } => {
                self.hub.publish(eid, HubPayload::Stderr(line)).await;
                None
            }
            SupervisorEvent::ResourceUsage { usage, .. } => {
                *last_usage = usage.clone();
                self.hub.publish(eid, HubPayload::ResourceUsage(usage)).await;
                None
            }
            SupervisorEvent::Completed { exit_code, output_files, .. } => {
                self.hub
                    .publish(eid, HubPayload::Completed { exit_code, output_files: output_files.clone() })
                    .await;
                let status = if exit_code == 0 { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
                let error = if exit_code == 0 { None } else { Some(format!("process exited with code {exit_code}")) };
                Some((
                    status,
                    ExecutionResults {
                        exit_code: Some(exit_code),
                        output: stdout.clone(),
                        output_files,
                        error,
                    },
                ))
            }
            SupervisorEvent::Failed { error, .. } => {
                self.hub.publish(eid, HubPayload::Error(error.clone())).await;
                Some((
                    ExecutionStatus::Failed,
                    ExecutionResults {
                        exit_code: None,
                        output: stdout.clone(),
                        output_files: Vec::new(),
                        error: Some(error),
                    },
                ))
            }
            SupervisorEvent::TimedOut { reason, .. } => {
                let message = format!("timed out ({reason:?})");
                self.hub.publish(eid, HubPayload::Error(message.clone())).await;
                Some((
                    ExecutionStatus::Failed,
                    ExecutionResults {
                        exit_code: None,
                        output: stdout.clone(),
                        output_files: Vec::new(),
                        error: Some(message),
                    },
                ))
            }
            SupervisorEvent::Cancelled { .. } => {
                self.hub.publish(eid, HubPayload::Status("cancelled".into())).await;
                Some((
                    ExecutionStatus::Stopped,
                    ExecutionResults {
                        exit_code: None,
                        output: stdout.clone(),
                        output_files: Vec::new(),
                        error: None,
                    },
                ))
            }
        }
    }

    fn build_command(
        &self,
        program: &Program,
        version: &Version,
        parameters: &Value,
        source: &CommandSource,
        sandbox_root: PathBuf,
    ) -> Result<RunnerCommand> {
        match source {
            CommandSource::Runner { env } => {
                let runner = self.runners.resolve(program.language)?;
                let entry_file = resolve_entry_file(program.language, version)?;
                let ctx = RunnerContext {
                    sandbox_root: &sandbox_root,
                    entry_file: &entry_file,
                    parameters,
                    node_env: env,
                };
                runner.build(&ctx)
            }
            CommandSource::WebApp { kind, port } => build_web_app_command(*kind, &sandbox_root, *port, parameters),
        }
    }

    async fn finish(&self, eid: ExecutionId, status: ExecutionStatus, results: ExecutionResults, resource_usage: ResourceUsage) {
        match self.execution_repo.get(eid).await {
            Ok(mut execution) => {
                let expected = execution.version;
                execution.finish(status, results, resource_usage);
                if let Err(e) = self.execution_repo.put(execution, Some(expected)).await {
                    warn!(%eid, error = %e, "failed to persist terminal execution state");
                }
            }
            Err(e) => warn!(%eid, error = %e, "execution disappeared before it could be finished"),
        }
        info!(%eid, ?status, "execution reached terminal state");
    }

    async fn finish_without_process(&self, eid: ExecutionId, status: ExecutionStatus, error: String) {
        self.hub.publish(eid, HubPayload::Error(error.clone())).await;
        self.finish(
            eid,
            status,
            ExecutionResults {
                exit_code: None,
                output: String::new(),
                output_files: Vec::new(),
                error: Some(error),
            },
            ResourceUsage::default(),
        )
        .await;
        self.active.lock().await.remove(&eid);
    }
}

fn resolve_entry_file(language: Language, version: &Version) -> Result<String> {
    let conventional = match language {
        Language::Python => "main.py",
        Language::Nodejs => "main.js",
        Language::Java => "Main.java",
        Language::Csharp => "Program.cs",
    };
    if version.files.iter().any(|f| f.path == conventional) {
        return Ok(conventional.to_string());
    }
    version
        .files
        .first()
        .map(|f| f.path.clone())
        .ok_or_else(|| TaskGridError::Validation(format!("version {} has no files to execute", version.id)))
}

fn build_web_app_command(kind: WebAppRunnerKind, sandbox_root: &std::path::Path, port: u16, parameters: &Value) -> Result<RunnerCommand> {
    match kind {
        WebAppRunnerKind::StaticServe => {
            let python = which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|_| TaskGridError::Runtime("no python interpreter found on PATH for static web app serving".into()))?;
            Ok(RunnerCommand {
                program: python.display().to_string(),
                args: vec!["-m".into(), "http.server".into(), port.to_string()],
                env: vec![("TASKGRID_EXECUTION".into(), "1".into())],
                cwd: sandbox_root.to_path_buf(),
                expected_outputs: sandbox_root.join("output"),
            })
        }
        WebAppRunnerKind::ContainerLaunch => {
            let image = parameters
                .get("image")
                .and_then(Value::as_str)
                .ok_or_else(|| TaskGridError::Validation("container web app deployment requires an \"image\" parameter".into()))?;
            let docker = which::which("docker").map_err(|_| TaskGridError::Runtime("no docker binary found on PATH".into()))?;
            Ok(RunnerCommand {
                program: docker.display().to_string(),
                args: vec!["run".into(), "--rm".into(), "-p".into(), format!("{port}:{port}"), image.to_string()],
                env: vec![],
                cwd: sandbox_root.to_path_buf(),
                expected_outputs: sandbox_root.join("output"),
            })
        }
    }
}

#[cfg(unix)]
fn send_pause_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    signal::kill(NixPid::from_raw(pid as i32), Signal::SIGSTOP)
        .map_err(|e| TaskGridError::Runtime(format!("failed to pause pid {pid}: {e}")))
}

#[cfg(unix)]
fn send_resume_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    signal::kill(NixPid::from_raw(pid as i32), Signal::SIGCONT)
        .map_err(|e| TaskGridError::Runtime(format!("failed to resume pid {pid}: {e}")))
}

#[cfg(windows)]
fn send_pause_signal(_pid: u32) -> Result<()> {
    Err(TaskGridError::Runtime("pause is not supported on this platform".into()))
}

#[cfg(windows)]
fn send_resume_signal(_pid: u32) -> Result<()> {
    Err(TaskGridError::Runtime("resume is not supported on this platform".into()))
}
