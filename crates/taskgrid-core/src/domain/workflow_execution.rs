//! `WorkflowExecution` and `NodeExecution` (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ExecutionId, NodeId, WorkflowId};

use super::{execution::ResourceUsage, CURRENT_SCHEMA_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkflowExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
    Timeout,
}

impl WorkflowExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
    Timeout,
    Retrying,
}

impl NodeExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped | Self::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: NodeId,
    pub status: NodeExecutionStatus,
    pub input_contract_ids: Vec<String>,
    pub output_contract_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    /// Link to the C5 `Execution` that backs this node, once dispatched.
    pub program_execution_id: Option<ExecutionId>,
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    pub fn pending(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: NodeExecutionStatus::Pending,
            input_contract_ids: Vec::new(),
            output_contract_id: None,
            error: None,
            retry_count: 0,
            program_execution_id: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total_nodes: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
    pub percent: f64,
}

impl Progress {
    pub fn recompute(&mut self) {
        let finished = self.completed + self.failed + self.skipped;
        self.percent = if self.total_nodes == 0 {
            100.0
        } else {
            (finished as f64 / self.total_nodes as f64) * 100.0
        };
    }

    /// I1: completed + failed + skipped == totalNodes, for a finished execution.
    pub fn is_consistent(&self) -> bool {
        self.completed + self.failed + self.skipped <= self.total_nodes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Normal,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_inputs: HashMap<String, Value>,
    pub global_variables: HashMap<String, Value>,
    pub environment: HashMap<String, String>,
    pub mode: ExecutionMode,
    pub save_intermediate_results: bool,
    pub max_concurrent_nodes: usize,
    pub timeout_minutes: u64,
    pub continue_on_error: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            user_inputs: HashMap::new(),
            global_variables: HashMap::new(),
            environment: HashMap::new(),
            mode: ExecutionMode::Normal,
            save_intermediate_results: true,
            max_concurrent_nodes: 5,
            timeout_minutes: 120,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecutionResults {
    pub final_outputs: HashMap<String, Value>,
    pub intermediate_results: HashMap<String, Value>,
    pub output_files: Vec<String>,
    pub statistics: HashMap<String, Value>,
}

/// A single run of a `Workflow`'s DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub executed_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: WorkflowExecutionStatus,
    pub progress: Progress,
    pub node_executions: Vec<NodeExecution>,
    pub execution_context: ExecutionContext,
    pub results: WorkflowExecutionResults,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub resource_usage: ResourceUsage,
    pub schema_version: u32,
    pub version: u64,
}

impl WorkflowExecution {
    pub fn new(workflow_id: WorkflowId, workflow_version: u32, executed_by: impl Into<String>, node_ids: Vec<NodeId>, context: ExecutionContext) -> Self {
        let total_nodes = node_ids.len();
        Self {
            id: ExecutionId::new(),
            workflow_id,
            workflow_version,
            executed_by: executed_by.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: WorkflowExecutionStatus::Pending,
            progress: Progress {
                total_nodes,
                ..Default::default()
            },
            node_executions: node_ids.into_iter().map(NodeExecution::pending).collect(),
            execution_context: context,
            results: WorkflowExecutionResults::default(),
            error: None,
            logs: Vec::new(),
            resource_usage: ResourceUsage::default(),
            schema_version: CURRENT_SCHEMA_VERSION,
            version: 0,
        }
    }

    pub fn node_execution_mut(&mut self, node_id: NodeId) -> Option<&mut NodeExecution> {
        self.node_executions.iter_mut().find(|ne| ne.node_id == node_id)
    }

    pub fn node_execution(&self, node_id: NodeId) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|ne| ne.node_id == node_id)
    }
}
