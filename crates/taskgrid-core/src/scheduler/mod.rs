//! Workflow Scheduler (C8): drives a `WorkflowExecution`'s DAG to
//! completion. Generalizes the teacher's `Orchestrator::race_single`
//! concurrency-capped dispatch loop from a fixed list of racers into a
//! dependency-driven ready-set recomputation over `Workflow`'s edges, built
//! on top of C5 (`ProgramExecutionEngine`), C6 (`DataContractRouter`), C7
//! (`WorkflowValidator`) and C9 (`UiSessionManager`).
//!
//! One dedicated `tokio` task owns a `WorkflowExecution`'s entire run, so
//! ready-set recomputation is serialized by construction: nothing else ever
//! mutates that execution's node statuses concurrently. External
//! pause/resume/cancel calls only flip flags on a lightweight
//! `ExecutionControl` the task polls every iteration; they never reach into
//! the task's local state directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::datacontract::DataContractRouter;
use crate::domain::workflow::{ConditionType, ConditionalExecution, Node, Workflow};
use crate::domain::workflow_execution::{ExecutionContext, NodeExecution, NodeExecutionStatus, WorkflowExecutionStatus};
use crate::domain::{InteractionType, UiInteraction, WorkflowExecution};
use crate::datacontract::ContractStore;
use crate::error::{Result, TaskGridError};
use crate::external::{WorkflowExecutionRepository, WorkflowRepository};
use crate::ids::{ExecutionId, NodeId, WorkflowId};
use crate::program::{ExecuteOptions, ProgramExecutionEngine};
use crate::queue::TaskQueue;
use crate::streaming::{HubPayload, StreamingHub};
use crate::ui_session::{UiResolution, UiSessionManager};
use crate::validator::WorkflowValidator;

/// Tracks a running workflow execution's external controls. The scheduling
/// task polls these every loop iteration rather than being signalled, so a
/// pause/cancel call never blocks on the task's internal state.
struct ExecutionControl {
    cancel: CancellationToken,
    paused: AtomicBool,
}

/// Outcome of one dispatched node, fed back into the scheduling loop
/// through a `JoinSet`.
struct NodeResult {
    node_id: NodeId,
    program_execution_id: Option<ExecutionId>,
    status: NodeExecutionStatus,
    raw_output: Option<Value>,
    error: Option<String>,
    can_retry: bool,
}

/// Drives `Workflow` DAGs to completion, one dedicated task per in-flight
/// `WorkflowExecution`.
pub struct WorkflowScheduler {
    config: OrchestratorConfig,
    workflow_repo: Arc<dyn WorkflowRepository>,
    execution_repo: Arc<dyn WorkflowExecutionRepository>,
    program_engine: Arc<ProgramExecutionEngine>,
    contract_store: Arc<dyn ContractStore>,
    ui_sessions: Arc<UiSessionManager>,
    hub: Arc<StreamingHub>,
    queue: Arc<TaskQueue>,
    controls: Mutex<std::collections::HashMap<ExecutionId, Arc<ExecutionControl>>>,
}

impl WorkflowScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        workflow_repo: Arc<dyn WorkflowRepository>,
        execution_repo: Arc<dyn WorkflowExecutionRepository>,
        program_engine: Arc<ProgramExecutionEngine>,
        contract_store: Arc<dyn ContractStore>,
        ui_sessions: Arc<UiSessionManager>,
        hub: Arc<StreamingHub>,
        queue: Arc<TaskQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            workflow_repo,
            execution_repo,
            program_engine,
            contract_store,
            ui_sessions,
            hub,
            queue,
            controls: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Validates the workflow (C7), persists a `Pending` `WorkflowExecution`,
    /// and enqueues its run through C10. Returns the `EID` immediately.
    pub async fn execute(self: &Arc<Self>, workflow_id: WorkflowId, executed_by: impl Into<String>, context: ExecutionContext) -> Result<ExecutionId> {
        let workflow = self.workflow_repo.get(workflow_id).await?;

        let validation = WorkflowValidator::validate(&workflow);
        if !validation.is_valid() {
            return Err(TaskGridError::Validation(format!(
                "workflow {workflow_id} failed validation: {:?}",
                validation.issues
            )));
        }

        let node_ids: Vec<NodeId> = workflow.nodes.iter().filter(|n| !n.disabled).map(|n| n.id).collect();
        let execution = WorkflowExecution::new(workflow_id, workflow.version, executed_by, node_ids, context);
        let eid = execution.id;
        let execution = self.execution_repo.put(execution, None).await?;

        let control = Arc::new(ExecutionControl {
            cancel: CancellationToken::new(),
            paused: AtomicBool::new(false),
        });
        self.controls.lock().await.insert(eid, Arc::clone(&control));

        let scheduler = Arc::clone(self);
        self.queue.enqueue(Box::new(move |shutdown| {
            Box::pin(async move {
                scheduler.run(workflow, execution, control, shutdown).await;
            })
        }))?;

        Ok(eid)
    }

    pub async fn status(&self, eid: ExecutionId) -> Result<WorkflowExecutionStatus> {
        Ok(self.execution_repo.get(eid).await?.status)
    }

    pub async fn result(&self, eid: ExecutionId) -> Result<WorkflowExecution> {
        self.execution_repo.get(eid).await
    }

    pub async fn pause_workflow(&self, eid: ExecutionId) -> Result<()> {
        let control = self.control_for(eid).await?;
        if control.paused.swap(true, Ordering::SeqCst) {
            return Err(TaskGridError::Validation(format!("workflow execution {eid} is already paused")));
        }
        self.hub.publish(eid, HubPayload::Status("paused".into())).await;
        Ok(())
    }

    pub async fn resume_workflow(&self, eid: ExecutionId) -> Result<()> {
        let control = self.control_for(eid).await?;
        if !control.paused.swap(false, Ordering::SeqCst) {
            return Err(TaskGridError::Validation(format!("workflow execution {eid} is not paused")));
        }
        self.hub.publish(eid, HubPayload::Status("running".into())).await;
        Ok(())
    }

    /// Cancels the run. The scheduling task cascades `stop(EID)` to every
    /// node with an in-flight program execution before marking the
    /// workflow execution `Cancelled`.
    pub async fn cancel_workflow(&self, eid: ExecutionId) -> Result<()> {
        let control = self.control_for(eid).await?;
        control.cancel.cancel();
        Ok(())
    }

    async fn control_for(&self, eid: ExecutionId) -> Result<Arc<ExecutionControl>> {
        self.controls
            .lock()
            .await
            .get(&eid)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("no active workflow execution {eid}")))
    }

    async fn run(self: Arc<Self>, workflow: Workflow, mut execution: WorkflowExecution, control: Arc<ExecutionControl>, shutdown: CancellationToken) {
        let eid = execution.id;
        self.hub.create_topic(eid).await;

        // Chains process-wide shutdown into this execution's own cancel
        // token (I6), so a queue-worker shutdown cascades into every
        // running node's `stop()` the same way an explicit `cancel_workflow`
        // call does.
        {
            let control = Arc::clone(&control);
            tokio::spawn(async move {
                shutdown.cancelled().await;
                control.cancel.cancel();
            });
        }
        execution.status = WorkflowExecutionStatus::Running;
        execution = match self.persist(execution).await {
            Some(e) => e,
            None => return,
        };

        let mut joinset: JoinSet<NodeResult> = JoinSet::new();
        let mut running: HashSet<NodeId> = HashSet::new();

        loop {
            if control.cancel.is_cancelled() {
                self.cancel_in_flight(&execution, &running).await;
                execution.status = WorkflowExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                execution = self.persist(execution).await.unwrap_or(execution);
                break;
            }

            if !control.paused.load(Ordering::SeqCst) {
                self.dispatch_ready(&workflow, &mut execution, &mut running, &mut joinset).await;
                execution = self.persist(execution).await.unwrap_or(execution);
            }

            if self.is_terminal(&workflow, &execution) {
                execution.status = if execution.progress.failed > 0 && !workflow.settings.continue_on_error {
                    WorkflowExecutionStatus::Failed
                } else {
                    WorkflowExecutionStatus::Completed
                };
                execution.completed_at = Some(Utc::now());
                execution = self.persist(execution).await.unwrap_or(execution);
                break;
            }

            if joinset.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            tokio::select! {
                biased;
                _ = control.cancel.cancelled() => { continue; }
                joined = joinset.join_next() => {
                    match joined {
                        Some(Ok(result)) => {
                            running.remove(&result.node_id);
                            execution = self.apply_result(&workflow, execution, result).await;
                        }
                        Some(Err(e)) => warn!(%eid, error = %e, "node task panicked"),
                        None => {}
                    }
                }
            }
        }

        self.hub.publish(eid, HubPayload::Status(format!("{:?}", execution.status))).await;
        self.controls.lock().await.remove(&eid);
        self.hub.schedule_teardown(eid, Duration::from_secs(self.config.general.streaming_grace_seconds));
        info!(%eid, status = ?execution.status, "workflow execution reached terminal state");
    }

    async fn persist(&self, execution: WorkflowExecution) -> Option<WorkflowExecution> {
        let eid = execution.id;
        let expected = execution.version;
        match self.execution_repo.put(execution, Some(expected)).await {
            Ok(updated) => Some(updated),
            Err(e) => {
                warn!(%eid, error = %e, "failed to persist workflow execution state");
                None
            }
        }
    }

    fn is_terminal(&self, workflow: &Workflow, execution: &WorkflowExecution) -> bool {
        let disabled: HashSet<NodeId> = workflow.nodes.iter().filter(|n| n.disabled).map(|n| n.id).collect();
        execution
            .node_executions
            .iter()
            .filter(|ne| !disabled.contains(&ne.node_id))
            .all(|ne| ne.status.is_terminal())
    }

    async fn cancel_in_flight(&self, execution: &WorkflowExecution, running: &HashSet<NodeId>) {
        for node_id in running {
            if let Some(ne) = execution.node_execution(*node_id) {
                self.stop_node(ne).await;
            }
        }
    }

    async fn stop_node(&self, node_execution: &NodeExecution) {
        if let Some(program_eid) = node_execution.program_execution_id {
            if let Err(e) = self.program_engine.stop(program_eid).await {
                warn!(%program_eid, error = %e, "failed to stop in-flight node during workflow cancellation");
            }
        }
    }

    /// Computes the ready set, applies conditional-execution gating, and
    /// dispatches up to the concurrency cap.
    async fn dispatch_ready(&self, workflow: &Workflow, execution: &mut WorkflowExecution, running: &mut HashSet<NodeId>, joinset: &mut JoinSet<NodeResult>) {
        let cap = workflow.settings.max_concurrent_nodes.min(execution.execution_context.max_concurrent_nodes).max(1);

        loop {
            if running.len() >= cap {
                return;
            }

            let mut ready = self.compute_ready(workflow, execution);
            if ready.is_empty() {
                return;
            }
            ready.sort_by(|a, b| {
                let pa = workflow.node(*a).map(|n| n.execution_settings.priority).unwrap_or(0);
                let pb = workflow.node(*b).map(|n| n.execution_settings.priority).unwrap_or(0);
                pb.cmp(&pa).then_with(|| a.as_uuid().cmp(&b.as_uuid()))
            });

            let mut dispatched_any = false;
            for node_id in ready {
                if running.len() >= cap {
                    break;
                }
                let node = match workflow.node(node_id) {
                    Some(n) => n.clone(),
                    None => continue,
                };

                if let Some(cond) = node.conditional_execution.clone() {
                    if !self.evaluate_condition(&cond, workflow, execution) {
                        self.skip_node(execution, node_id, "conditional execution evaluated to false".into());
                        dispatched_any = true;
                        continue;
                    }
                }

                let router = DataContractRouter::new(workflow);
                let inputs = match router.assemble_inputs(self.contract_store.as_ref(), execution.id, node_id) {
                    Ok(v) => v,
                    Err(e) => {
                        self.mark_node_failed(workflow, execution, node_id, e.to_string(), false);
                        dispatched_any = true;
                        continue;
                    }
                };

                running.insert(node_id);
                dispatched_any = true;
                if let Some(ne) = execution.node_execution_mut(node_id) {
                    ne.status = NodeExecutionStatus::Running;
                    ne.started_at = Some(Utc::now());
                }
                execution.progress.running = running.len();
                execution.progress.recompute();

                if node.requires_ui_interaction() {
                    joinset.spawn(dispatch_ui_node(Arc::clone(&self.ui_sessions) as Arc<UiSessionManager>, execution.id, node));
                } else {
                    let (started_tx, started_rx) = oneshot::channel();
                    joinset.spawn(dispatch_program_node(
                        Arc::clone(&self.program_engine),
                        Arc::clone(&self.hub),
                        execution.executed_by.clone(),
                        node,
                        inputs,
                        started_tx,
                    ));
                    // execute() only persists + enqueues, so this resolves
                    // almost immediately and lets cancel_in_flight reach the
                    // node once it is actually running.
                    if let Ok(program_eid) = started_rx.await {
                        if let Some(ne) = execution.node_execution_mut(node_id) {
                            ne.program_execution_id = Some(program_eid);
                        }
                    }
                }
            }

            if !dispatched_any {
                return;
            }
        }
    }

    fn compute_ready(&self, workflow: &Workflow, execution: &WorkflowExecution) -> Vec<NodeId> {
        workflow
            .nodes
            .iter()
            .filter(|n| !n.disabled)
            .filter(|n| execution.node_execution(n.id).map(|ne| ne.status) == Some(NodeExecutionStatus::Pending))
            .filter(|n| self.dependencies_satisfied(workflow, execution, n))
            .map(|n| n.id)
            .collect()
    }

    fn dependencies_satisfied(&self, workflow: &Workflow, execution: &WorkflowExecution, node: &Node) -> bool {
        workflow.edges_into(node.id).all(|edge| {
            let required = node
                .input_configuration
                .mappings
                .iter()
                .any(|m| m.source_node_id == Some(edge.source_node_id) && m.required);
            match execution.node_execution(edge.source_node_id).map(|ne| ne.status) {
                Some(NodeExecutionStatus::Completed) => true,
                Some(NodeExecutionStatus::Skipped) => !required,
                _ => false,
            }
        })
    }

    /// `Expression` is a minimal comparator over `ExecutionContext`'s
    /// variables (`left OP right`, OP in `==`/`!=`/`>`/`<`/`>=`/`<=`), a
    /// narrower scope than C6's arithmetic-only `Expression` transformation
    /// kind — booleans and arithmetic are different enough needs that
    /// reusing one for the other would strain both (see DESIGN.md).
    fn evaluate_condition(&self, condition: &ConditionalExecution, workflow: &Workflow, execution: &WorkflowExecution) -> bool {
        match condition.condition_type {
            ConditionType::PreviousNodeSuccess => self.predecessor_statuses(workflow, execution, condition).into_iter().all(|s| s == NodeExecutionStatus::Completed),
            ConditionType::PreviousNodeFailure => self.predecessor_statuses(workflow, execution, condition).into_iter().any(|s| s == NodeExecutionStatus::Failed),
            ConditionType::Expression => evaluate_expression_condition(&condition.expression, &execution.execution_context),
        }
    }

    fn predecessor_statuses(&self, workflow: &Workflow, execution: &WorkflowExecution, condition: &ConditionalExecution) -> Vec<NodeExecutionStatus> {
        let target = condition.alternative_node_id;
        workflow
            .edges
            .iter()
            .filter(|e| !e.disabled && (target.is_none() || Some(e.target_node_id) == target))
            .filter_map(|e| execution.node_execution(e.source_node_id).map(|ne| ne.status))
            .collect()
    }

    fn skip_node(&self, execution: &mut WorkflowExecution, node_id: NodeId, reason: String) {
        if let Some(ne) = execution.node_execution_mut(node_id) {
            ne.status = NodeExecutionStatus::Skipped;
            ne.skip_reason = Some(reason);
            ne.completed_at = Some(Utc::now());
        }
        execution.progress.skipped += 1;
        execution.progress.recompute();
    }

    fn mark_node_failed(&self, workflow: &Workflow, execution: &mut WorkflowExecution, node_id: NodeId, error: String, can_retry: bool) {
        let node = match workflow.node(node_id) {
            Some(n) => n,
            None => return,
        };
        let max_retries = if node.execution_settings.retry_count > 0 {
            node.execution_settings.retry_count
        } else {
            workflow.settings.retry_policy.max_retries
        };

        let should_retry = can_retry
            && execution
                .node_execution(node_id)
                .map(|ne| ne.retry_count < max_retries)
                .unwrap_or(false);

        if should_retry {
            let delay = retry_delay(node, workflow, execution.node_execution(node_id).map(|ne| ne.retry_count).unwrap_or(0));
            if let Some(ne) = execution.node_execution_mut(node_id) {
                ne.retry_count += 1;
                ne.status = NodeExecutionStatus::Retrying;
                ne.error = Some(error);
            }
            let repo = Arc::clone(&self.execution_repo);
            let eid = execution.id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(mut exec) = repo.get(eid).await {
                    let expected = exec.version;
                    if let Some(ne) = exec.node_execution_mut(node_id) {
                        if ne.status == NodeExecutionStatus::Retrying {
                            ne.status = NodeExecutionStatus::Pending;
                            let _ = repo.put(exec, Some(expected)).await;
                        }
                    }
                }
            });
            return;
        }

        if let Some(ne) = execution.node_execution_mut(node_id) {
            ne.status = NodeExecutionStatus::Failed;
            ne.error = Some(error.clone());
            ne.completed_at = Some(Utc::now());
        }
        execution.progress.failed += 1;
        execution.progress.recompute();

        if workflow.settings.continue_on_error || execution.execution_context.continue_on_error {
            self.skip_downstream(workflow, execution, node_id);
        } else {
            execution.error = Some(error);
        }
    }

    /// Marks every node reachable only through `node_id`'s required edges
    /// as `Skipped`, so `continueOnError` doesn't leave the DAG stalled on
    /// a permanently-unsatisfiable dependency.
    fn skip_downstream(&self, workflow: &Workflow, execution: &mut WorkflowExecution, node_id: NodeId) {
        let mut queue = vec![node_id];
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop() {
            if !visited.insert(current) {
                continue;
            }
            for edge in workflow.edges_from(current) {
                let target = edge.target_node_id;
                let still_pending = execution.node_execution(target).map(|ne| ne.status) == Some(NodeExecutionStatus::Pending);
                if !still_pending {
                    continue;
                }
                let target_node = match workflow.node(target) {
                    Some(n) => n,
                    None => continue,
                };
                let required = target_node
                    .input_configuration
                    .mappings
                    .iter()
                    .any(|m| m.source_node_id == Some(current) && m.required);
                if required {
                    self.skip_node(execution, target, "upstream node failed".into());
                    queue.push(target);
                }
            }
        }
    }

    async fn apply_result(&self, workflow: &Workflow, mut execution: WorkflowExecution, result: NodeResult) -> WorkflowExecution {
        let eid = execution.id;
        match result.status {
            NodeExecutionStatus::Completed => {
                if let Some(ne) = execution.node_execution_mut(result.node_id) {
                    ne.status = NodeExecutionStatus::Completed;
                    ne.completed_at = Some(Utc::now());
                    ne.program_execution_id = result.program_execution_id;
                }
                execution.progress.completed += 1;
                execution.progress.running = execution.progress.running.saturating_sub(1);
                execution.progress.recompute();

                if let Some(raw) = &result.raw_output {
                    let router = DataContractRouter::new(workflow);
                    if let Err(e) = router.route_outputs(self.contract_store.as_ref(), eid, result.node_id, raw) {
                        warn!(%eid, node = %result.node_id, error = %e, "failed to route node outputs downstream");
                    }
                    execution.results.intermediate_results.insert(result.node_id.to_string(), raw.clone());
                    if workflow.edges_from(result.node_id).next().is_none() {
                        execution.results.final_outputs.insert(result.node_id.to_string(), raw.clone());
                    }
                }
            }
            NodeExecutionStatus::Skipped => {
                self.skip_node(&mut execution, result.node_id, result.error.unwrap_or_default());
                execution.progress.running = execution.progress.running.saturating_sub(1);
            }
            _ => {
                if let Some(ne) = execution.node_execution_mut(result.node_id) {
                    ne.program_execution_id = result.program_execution_id;
                }
                execution.progress.running = execution.progress.running.saturating_sub(1);
                self.mark_node_failed(workflow, &mut execution, result.node_id, result.error.unwrap_or_else(|| "node failed".into()), result.can_retry);
            }
        }

        self.persist(execution.clone()).await.unwrap_or(execution)
    }
}

/// Spawned into the scheduler's `JoinSet`: dispatches a program node through
/// C5 and awaits its terminal event over C4, without holding a scheduler
/// lock for the duration.
async fn dispatch_program_node(engine: Arc<ProgramExecutionEngine>, hub: Arc<StreamingHub>, user: String, node: Node, inputs: Value, started: oneshot::Sender<ExecutionId>) -> NodeResult {
    let (program_id, version_id) = match (node.program_id, node.version_id) {
        (Some(p), Some(v)) => (p, v),
        _ => {
            return NodeResult {
                node_id: node.id,
                program_execution_id: None,
                status: NodeExecutionStatus::Failed,
                raw_output: None,
                error: Some("node has no program/version bound".into()),
                can_retry: false,
            }
        }
    };

    let mut options = ExecuteOptions::default();
    if let Some(minutes) = node.execution_settings.timeout_minutes {
        let timeout = Duration::from_secs(minutes * 60);
        options.idle_timeout = Some(timeout);
        options.hard_timeout = Some(timeout);
    }
    options.env = node.execution_settings.environment.clone();

    let program_eid = match engine.execute(program_id, version_id, user, inputs, options).await {
        Ok(eid) => eid,
        Err(e) => {
            return NodeResult {
                node_id: node.id,
                program_execution_id: None,
                status: NodeExecutionStatus::Failed,
                raw_output: None,
                error: Some(e.to_string()),
                can_retry: false,
            }
        }
    };
    let _ = started.send(program_eid);

    let mut sub = hub.join(program_eid).await;
    loop {
        match sub.recv().await {
            Some(event) => match event.payload {
                HubPayload::Completed { exit_code, .. } => {
                    return finish_program_node(&engine, node.id, program_eid, exit_code).await;
                }
                HubPayload::Error(error) => {
                    return NodeResult {
                        node_id: node.id,
                        program_execution_id: Some(program_eid),
                        status: NodeExecutionStatus::Failed,
                        raw_output: None,
                        error: Some(error),
                        can_retry: true,
                    };
                }
                HubPayload::Status(s) if s == "cancelled" => {
                    return NodeResult {
                        node_id: node.id,
                        program_execution_id: Some(program_eid),
                        status: NodeExecutionStatus::Cancelled,
                        raw_output: None,
                        error: None,
                        can_retry: false,
                    };
                }
                _ => continue,
            },
            None => {
                return NodeResult {
                    node_id: node.id,
                    program_execution_id: Some(program_eid),
                    status: NodeExecutionStatus::Failed,
                    raw_output: None,
                    error: Some("execution stream ended without a terminal event".into()),
                    can_retry: true,
                };
            }
        }
    }
}

async fn finish_program_node(engine: &Arc<ProgramExecutionEngine>, node_id: NodeId, program_eid: ExecutionId, exit_code: i32) -> NodeResult {
    let execution = match engine.result(program_eid).await {
        Ok(e) => e,
        Err(e) => {
            return NodeResult {
                node_id,
                program_execution_id: Some(program_eid),
                status: NodeExecutionStatus::Failed,
                raw_output: None,
                error: Some(e.to_string()),
                can_retry: false,
            }
        }
    };

    if exit_code != 0 {
        return NodeResult {
            node_id,
            program_execution_id: Some(program_eid),
            status: NodeExecutionStatus::Failed,
            raw_output: None,
            error: execution.results.error.or_else(|| Some(format!("process exited with code {exit_code}"))),
            can_retry: true,
        };
    }

    let raw_output = serde_json::from_str::<Value>(&execution.results.output).unwrap_or_else(|_| Value::String(execution.results.output.clone()));
    NodeResult {
        node_id,
        program_execution_id: Some(program_eid),
        status: NodeExecutionStatus::Completed,
        raw_output: Some(raw_output),
        error: None,
        can_retry: false,
    }
}

/// Spawned into the scheduler's `JoinSet`: suspends on a UI interaction
/// without occupying a concurrency slot's program-dispatch path, since the
/// slot is released only once the human responds.
async fn dispatch_ui_node(ui_sessions: Arc<UiSessionManager>, workflow_execution_id: ExecutionId, node: Node) -> NodeResult {
    let timeout = node.execution_settings.timeout_minutes.map(|m| chrono::Duration::minutes(m as i64));
    let schema = node.ui_input_schema.clone().unwrap_or(Value::Null);
    let interaction = UiInteraction::new(workflow_execution_id, node.id, InteractionType::UserInput, schema, timeout);
    let rx = ui_sessions.create(interaction).await;

    match rx.await {
        Ok(UiResolution::Submitted(output)) => NodeResult {
            node_id: node.id,
            program_execution_id: None,
            status: NodeExecutionStatus::Completed,
            raw_output: Some(output),
            error: None,
            can_retry: false,
        },
        Ok(UiResolution::Cancelled) => NodeResult {
            node_id: node.id,
            program_execution_id: None,
            status: NodeExecutionStatus::Cancelled,
            raw_output: None,
            error: Some("ui interaction cancelled".into()),
            can_retry: false,
        },
        Ok(UiResolution::TimedOut) => NodeResult {
            node_id: node.id,
            program_execution_id: None,
            status: NodeExecutionStatus::Timeout,
            raw_output: None,
            error: Some("ui interaction timed out".into()),
            can_retry: false,
        },
        Err(_) => NodeResult {
            node_id: node.id,
            program_execution_id: None,
            status: NodeExecutionStatus::Failed,
            raw_output: None,
            error: Some("ui session manager dropped the waiter".into()),
            can_retry: false,
        },
    }
}

fn retry_delay(node: &Node, workflow: &Workflow, retry_count: u32) -> Duration {
    let (base, exponential) = if node.execution_settings.retry_count > 0 {
        (node.execution_settings.retry_delay_seconds, node.execution_settings.exponential_backoff)
    } else {
        (workflow.settings.retry_policy.delay_seconds, workflow.settings.retry_policy.exponential_backoff)
    };
    let seconds = if exponential { base.saturating_mul(1u64 << retry_count.min(10)) } else { base };
    Duration::from_secs(seconds.max(1))
}

/// Minimal comparator expression: `left OP right` where each side is
/// resolved from `globalVariables`/`userInputs` by name, falling back to a
/// literal JSON scalar if no such variable exists.
fn evaluate_expression_condition(expression: &str, context: &ExecutionContext) -> bool {
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some((left, right)) = expression.split_once(op) {
            let lval = resolve_operand(left.trim(), context);
            let rval = resolve_operand(right.trim(), context);
            return compare(op, &lval, &rval);
        }
    }
    // No recognized operator: a bare truthy-variable reference.
    matches!(resolve_operand(expression.trim(), context), Value::Bool(true))
}

fn resolve_operand(raw: &str, context: &ExecutionContext) -> Value {
    if let Some(v) = context.global_variables.get(raw).or_else(|| context.user_inputs.get(raw)) {
        return v.clone();
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.trim_matches('"').to_string()))
}

fn compare(op: &str, lval: &Value, rval: &Value) -> bool {
    if let (Some(l), Some(r)) = (lval.as_f64(), rval.as_f64()) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">=" => l >= r,
            "<=" => l <= r,
            ">" => l > r,
            "<" => l < r,
            _ => false,
        };
    }
    match op {
        "==" => lval == rval,
        "!=" => lval != rval,
        _ => false,
    }
}
