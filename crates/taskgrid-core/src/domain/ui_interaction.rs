//! `UIInteraction` (spec §3): a human-in-the-loop pause point inside a
//! workflow execution, owned by C9.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{InteractionId, NodeId, ExecutionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InteractionType {
    UserInput,
    Confirmation,
    Selection,
    FileUpload,
    DataReview,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UiInteractionStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Timeout,
}

impl UiInteractionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Created by C8 when a workflow execution reaches a UI node, resolved by
/// external submission through C9, which releases the scheduler's waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiInteraction {
    pub id: InteractionId,
    pub workflow_execution_id: ExecutionId,
    pub node_id: NodeId,
    pub interaction_type: InteractionType,
    pub status: UiInteractionStatus,
    pub input_schema: Value,
    pub output_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout: Option<chrono::Duration>,
}

impl UiInteraction {
    pub fn new(workflow_execution_id: ExecutionId, node_id: NodeId, interaction_type: InteractionType, input_schema: Value, timeout: Option<chrono::Duration>) -> Self {
        Self {
            id: InteractionId::new(),
            workflow_execution_id,
            node_id,
            interaction_type,
            status: UiInteractionStatus::Pending,
            input_schema,
            output_data: None,
            created_at: Utc::now(),
            completed_at: None,
            timeout,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.timeout {
            Some(window) => now >= self.created_at + window,
            None => false,
        }
    }
}
