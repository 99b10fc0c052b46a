//! Entity definitions for the data model (spec §3). Pure data, no behavior;
//! components operate on these through the repository traits in `external`.

pub mod data_contract;
pub mod execution;
pub mod program;
pub mod ui_interaction;
pub mod workflow;
pub mod workflow_execution;

pub use data_contract::{ContractMetadata, DataType, Lineage, WorkflowDataContract};
pub use execution::{Execution, ExecutionResults, ExecutionStatus, ResourceUsage};
pub use program::{Language, Permissions, Program, UiComponent, UiComponentStatus, Version, VersionFile, VersionStatus};
pub use ui_interaction::{InteractionType, UiInteraction, UiInteractionStatus};
pub use workflow::{Edge, EdgeType, Node, NodeType, Transformation, TransformationKind, Workflow, WorkflowSettings, WorkflowStatus};
pub use workflow_execution::{
    ExecutionContext, NodeExecution, NodeExecutionStatus, Progress, WorkflowExecution,
    WorkflowExecutionResults, WorkflowExecutionStatus,
};

/// Every persisted entity carries a schema version so the external
/// persistence collaborator can evolve its documents without a migration
/// step in the core (ambient stack addition, mirrors the teacher's
/// `RunManifest::CURRENT_SCHEMA_VERSION`).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
