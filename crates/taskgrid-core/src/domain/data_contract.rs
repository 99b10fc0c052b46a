//! `WorkflowDataContract` (spec §3): the immutable, versioned envelope
//! around a value flowing along an edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NodeId;

use super::workflow::{Transformation, TransformationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Json,
    Xml,
    Csv,
    Binary,
    Text,
}

/// I4: `sourceNodes` lists exactly the transitive upstream nodes that
/// contributed to the contract this lineage is attached to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineage {
    pub source_nodes: Vec<NodeId>,
    pub transformation_path: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub content_type: String,
    pub size: u64,
    pub transformations: Vec<Transformation>,
    pub validation_results: Vec<String>,
    pub lineage: Lineage,
}

/// Produced by exactly one node execution; borrowed by zero or more
/// downstream readers. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDataContract {
    pub contract_id: String,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub data_type: DataType,
    pub data: Value,
    pub metadata: ContractMetadata,
    pub schema: Option<Value>,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub checksum: Option<String>,
}

impl WorkflowDataContract {
    pub fn new(source_node_id: NodeId, target_node_id: NodeId, data: Value, kind: TransformationKind, expression: String) -> Self {
        Self {
            contract_id: uuid::Uuid::new_v4().to_string(),
            source_node_id,
            target_node_id,
            data_type: DataType::Json,
            data,
            metadata: ContractMetadata {
                content_type: "application/json".into(),
                transformations: vec![Transformation { kind, expression }],
                lineage: Lineage {
                    source_nodes: vec![source_node_id],
                    ..Default::default()
                },
                ..Default::default()
            },
            schema: None,
            version: 1,
            timestamp: Utc::now(),
            checksum: None,
        }
    }
}
