//! `Workflow`, `Node`, `Edge` (spec §3). The structural definition consumed
//! by the validator (C7) and scheduler (C8).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, ProgramId, VersionId, WorkflowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeType {
    Program,
    StartNode,
    EndNode,
    DecisionNode,
    MergeNode,
    SubWorkflow,
    CustomFunction,
    /// Not in spec.md's enum literally, but nodes whose `inputSchema`
    /// requires human input are routed to C9; this flag lives on the node
    /// (see `Node::requires_ui_interaction`) rather than as a NodeType
    /// variant, matching the scheduler's treatment in SPEC_FULL §4.8.
    Ui,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputMapping {
    pub source_node_id: Option<NodeId>,
    pub source_output_name: Option<String>,
    pub target_input_name: String,
    pub required: bool,
    pub expected_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfiguration {
    pub mappings: Vec<InputMapping>,
    pub static_inputs: HashMap<String, Value>,
    pub user_inputs: HashMap<String, Value>,
    pub validation_rules: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputMapping {
    pub output_name: String,
    /// Path/expression into the producing node's raw output, interpreted
    /// per `TransformationKind`.
    pub source_path: String,
    pub kind: TransformationKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfiguration {
    pub mappings: Vec<OutputMapping>,
    pub schema: Option<Value>,
    pub cache_results: bool,
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_bytes: Option<u64>,
    pub max_cpu_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub timeout_minutes: Option<u64>,
    pub retry_count: u32,
    pub retry_delay_seconds: u64,
    pub exponential_backoff: bool,
    pub resource_limits: ResourceLimits,
    pub environment: HashMap<String, String>,
    pub run_in_parallel: bool,
    pub priority: i32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: None,
            retry_count: 0,
            retry_delay_seconds: 1,
            exponential_backoff: false,
            resource_limits: ResourceLimits::default(),
            environment: HashMap::new(),
            run_in_parallel: true,
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    Expression,
    PreviousNodeSuccess,
    PreviousNodeFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalExecution {
    pub expression: String,
    pub condition_type: ConditionType,
    pub skip_if_fails: bool,
    pub alternative_node_id: Option<NodeId>,
}

/// One unit of work in a `Workflow`'s DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub program_id: Option<ProgramId>,
    pub version_id: Option<VersionId>,
    pub node_type: NodeType,
    pub input_configuration: InputConfiguration,
    pub output_configuration: OutputConfiguration,
    pub execution_settings: ExecutionSettings,
    pub conditional_execution: Option<ConditionalExecution>,
    pub disabled: bool,
    /// UI-interaction schema, present only for nodes C8 routes to C9.
    pub ui_input_schema: Option<Value>,
}

impl Node {
    pub fn requires_ui_interaction(&self) -> bool {
        matches!(self.node_type, NodeType::Ui) || self.ui_input_schema.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EdgeType {
    Data,
    Control,
    Conditional,
    Parallel,
    Merge,
    Loop,
}

impl EdgeType {
    /// Loop edges are exempted from the acyclicity check (§3 invariant).
    pub fn participates_in_cycle_check(&self) -> bool {
        !matches!(self, Self::Loop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransformationKind {
    #[serde(rename = "JSONPath")]
    JsonPath,
    #[serde(rename = "JMESPath")]
    JmesPath,
    Expression,
    Template,
    NoTransform,
}

impl Default for TransformationKind {
    fn default() -> Self {
        Self::NoTransform
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub kind: TransformationKind,
    pub expression: String,
}

/// A directed connection between two nodes, optionally carrying a data
/// transformation. `edgeType=Loop` exempts the edge from cycle detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub source_output_name: String,
    pub target_input_name: String,
    pub edge_type: EdgeType,
    pub condition: Option<String>,
    pub transformation: Option<Transformation>,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay_seconds: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_seconds: 1,
            exponential_backoff: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub max_concurrent_nodes: usize,
    pub timeout_minutes: u64,
    pub retry_policy: RetryPolicy,
    pub save_intermediate_results: bool,
    pub continue_on_error: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 5,
            timeout_minutes: 120,
            retry_policy: RetryPolicy::default(),
            save_intermediate_results: true,
            continue_on_error: false,
        }
    }
}

/// A DAG of `Node`s connected by `Edge`s, plus scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub creator: String,
    pub status: WorkflowStatus,
    pub version: u32,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub settings: WorkflowSettings,
    pub permissions: super::program::Permissions,
    pub tags: Vec<String>,
    pub is_template: bool,
    pub schema_version: u32,
    pub optimistic_version: u64,
}

impl Workflow {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source_node_id == id && !e.disabled)
    }

    pub fn edges_into(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target_node_id == id && !e.disabled)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
