//! Persistence traits (spec §6). Each repository offers by-id lookup, a
//! parent-scoped listing, and an optimistic-update path keyed by the
//! record's `version: u64` field (a compare-and-swap guard every real
//! implementation must honor; the in-memory reference here enforces it so
//! tests exercise the same contract).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{Execution, Program, UiInteraction, Version, Workflow, WorkflowExecution};
use crate::error::{Result, TaskGridError};
use crate::ids::{ExecutionId, InteractionId, ProgramId, VersionId, WorkflowId};

/// Bumps `*version` and returns the prior value, the way every repository
/// impl below persists an optimistic update.
fn bump_version(version: &mut u64) -> u64 {
    let prior = *version;
    *version += 1;
    prior
}

fn conflict(kind: &str, id: impl std::fmt::Display, expected: u64, actual: u64) -> TaskGridError {
    TaskGridError::NotFound(format!(
        "{kind} {id}: optimistic update conflict (expected version {expected}, found {actual})"
    ))
}

#[async_trait]
pub trait ProgramRepository: Send + Sync {
    async fn get(&self, id: ProgramId) -> Result<Program>;
    async fn list_all(&self) -> Result<Vec<Program>>;
    async fn put(&self, program: Program, expected_version: Option<u64>) -> Result<Program>;
}

#[derive(Default)]
pub struct InMemoryProgramRepository {
    programs: Mutex<HashMap<ProgramId, Program>>,
}

impl InMemoryProgramRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgramRepository for InMemoryProgramRepository {
    async fn get(&self, id: ProgramId) -> Result<Program> {
        self.programs
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("program {id}")))
    }

    async fn list_all(&self) -> Result<Vec<Program>> {
        Ok(self.programs.lock().expect("poisoned").values().cloned().collect())
    }

    async fn put(&self, mut program: Program, expected_version: Option<u64>) -> Result<Program> {
        let mut programs = self.programs.lock().expect("poisoned");
        if let Some(expected) = expected_version {
            if let Some(existing) = programs.get(&program.id) {
                if existing.version != expected {
                    return Err(conflict("program", program.id, expected, existing.version));
                }
            }
        }
        bump_version(&mut program.version);
        programs.insert(program.id, program.clone());
        Ok(program)
    }
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn get(&self, id: VersionId) -> Result<Version>;
    async fn get_by_number(&self, program_id: ProgramId, number: u32) -> Result<Version>;
    async fn list_by_program(&self, program_id: ProgramId) -> Result<Vec<Version>>;
    async fn put(&self, version: Version, expected_version: Option<u64>) -> Result<Version>;
}

#[derive(Default)]
pub struct InMemoryVersionRepository {
    versions: Mutex<HashMap<VersionId, Version>>,
}

impl InMemoryVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionRepository for InMemoryVersionRepository {
    async fn get(&self, id: VersionId) -> Result<Version> {
        self.versions
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("version {id}")))
    }

    async fn get_by_number(&self, program_id: ProgramId, number: u32) -> Result<Version> {
        self.versions
            .lock()
            .expect("poisoned")
            .values()
            .find(|v| v.program_id == program_id && v.number == number)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("version {program_id}#{number}")))
    }

    async fn list_by_program(&self, program_id: ProgramId) -> Result<Vec<Version>> {
        Ok(self
            .versions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|v| v.program_id == program_id)
            .cloned()
            .collect())
    }

    async fn put(&self, mut version: Version, expected_version: Option<u64>) -> Result<Version> {
        let mut versions = self.versions.lock().expect("poisoned");
        if let Some(expected) = expected_version {
            if let Some(existing) = versions.get(&version.id) {
                if existing.version != expected {
                    return Err(conflict("version", version.id, expected, existing.version));
                }
            }
        }
        bump_version(&mut version.version);
        versions.insert(version.id, version.clone());
        Ok(version)
    }
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn get(&self, id: ExecutionId) -> Result<Execution>;
    async fn list_by_program(&self, program_id: ProgramId) -> Result<Vec<Execution>>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Execution>>;
    async fn put(&self, execution: Execution, expected_version: Option<u64>) -> Result<Execution>;
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: Mutex<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get(&self, id: ExecutionId) -> Result<Execution> {
        self.executions
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("execution {id}")))
    }

    async fn list_by_program(&self, program_id: ProgramId) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|e| e.program_id == program_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn put(&self, mut execution: Execution, expected_version: Option<u64>) -> Result<Execution> {
        let mut executions = self.executions.lock().expect("poisoned");
        if let Some(expected) = expected_version {
            if let Some(existing) = executions.get(&execution.id) {
                if existing.version != expected {
                    return Err(conflict("execution", execution.id, expected, existing.version));
                }
            }
        }
        bump_version(&mut execution.version);
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get(&self, id: WorkflowId) -> Result<Workflow>;
    async fn list_all(&self) -> Result<Vec<Workflow>>;
    async fn put(&self, workflow: Workflow, expected_version: Option<u64>) -> Result<Workflow>;
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Mutex<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get(&self, id: WorkflowId) -> Result<Workflow> {
        self.workflows
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("workflow {id}")))
    }

    async fn list_all(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.lock().expect("poisoned").values().cloned().collect())
    }

    async fn put(&self, mut workflow: Workflow, expected_version: Option<u64>) -> Result<Workflow> {
        let mut workflows = self.workflows.lock().expect("poisoned");
        if let Some(expected) = expected_version {
            if let Some(existing) = workflows.get(&workflow.id) {
                if existing.optimistic_version != expected {
                    return Err(conflict("workflow", workflow.id, expected, existing.optimistic_version));
                }
            }
        }
        bump_version(&mut workflow.optimistic_version);
        workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }
}

#[async_trait]
pub trait WorkflowExecutionRepository: Send + Sync {
    async fn get(&self, id: ExecutionId) -> Result<WorkflowExecution>;
    async fn list_by_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>>;
    async fn put(&self, execution: WorkflowExecution, expected_version: Option<u64>) -> Result<WorkflowExecution>;
    async fn push_log(&self, id: ExecutionId, line: String) -> Result<()>;
    async fn update_progress(&self, id: ExecutionId, progress: crate::domain::Progress) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryWorkflowExecutionRepository {
    executions: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryWorkflowExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowExecutionRepository for InMemoryWorkflowExecutionRepository {
    async fn get(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.executions
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("workflow execution {id}")))
    }

    async fn list_by_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn put(&self, mut execution: WorkflowExecution, expected_version: Option<u64>) -> Result<WorkflowExecution> {
        let mut executions = self.executions.lock().expect("poisoned");
        if let Some(expected) = expected_version {
            if let Some(existing) = executions.get(&execution.id) {
                if existing.version != expected {
                    return Err(conflict("workflow execution", execution.id, expected, existing.version));
                }
            }
        }
        bump_version(&mut execution.version);
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn push_log(&self, id: ExecutionId, line: String) -> Result<()> {
        let mut executions = self.executions.lock().expect("poisoned");
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| TaskGridError::NotFound(format!("workflow execution {id}")))?;
        execution.logs.push(line);
        Ok(())
    }

    async fn update_progress(&self, id: ExecutionId, progress: crate::domain::Progress) -> Result<()> {
        let mut executions = self.executions.lock().expect("poisoned");
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| TaskGridError::NotFound(format!("workflow execution {id}")))?;
        execution.progress = progress;
        Ok(())
    }
}

#[async_trait]
pub trait UiInteractionRepository: Send + Sync {
    async fn get(&self, id: InteractionId) -> Result<UiInteraction>;
    async fn list_pending_for_execution(&self, workflow_execution_id: ExecutionId) -> Result<Vec<UiInteraction>>;
    async fn list_pending(&self) -> Result<Vec<UiInteraction>>;
    async fn put(&self, interaction: UiInteraction) -> Result<UiInteraction>;
}

#[derive(Default)]
pub struct InMemoryUiInteractionRepository {
    interactions: Mutex<HashMap<InteractionId, UiInteraction>>,
}

impl InMemoryUiInteractionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UiInteractionRepository for InMemoryUiInteractionRepository {
    async fn get(&self, id: InteractionId) -> Result<UiInteraction> {
        self.interactions
            .lock()
            .expect("poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("ui interaction {id}")))
    }

    async fn list_pending_for_execution(&self, workflow_execution_id: ExecutionId) -> Result<Vec<UiInteraction>> {
        Ok(self
            .interactions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|i| i.workflow_execution_id == workflow_execution_id && !i.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<UiInteraction>> {
        Ok(self
            .interactions
            .lock()
            .expect("poisoned")
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn put(&self, interaction: UiInteraction) -> Result<UiInteraction> {
        self.interactions
            .lock()
            .expect("poisoned")
            .insert(interaction.id, interaction.clone());
        Ok(interaction)
    }
}
