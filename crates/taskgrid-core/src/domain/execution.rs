//! `Execution` (program-level run; spec §3's "Execution (program)").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ExecutionId, ProgramId, VersionId};

use super::CURRENT_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Accumulated CPU time, in milliseconds.
    pub cpu_time_ms: u64,
    /// Peak resident set size, in bytes.
    pub memory_used_bytes: u64,
    /// Bytes written under the sandbox's `output/` directory.
    pub disk_used_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub exit_code: Option<i32>,
    /// Captured stdout, truncated to a bounded tail (§9 open question:
    /// truncation is byte-based, see DESIGN.md).
    pub output: String,
    pub output_files: Vec<String>,
    pub error: Option<String>,
}

/// A single dispatch of a program against a version with user-supplied
/// parameters. Created when dispatched; terminal once
/// completed/failed/stopped; status transitions are monotonic (never
/// reverts from a terminal state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub program_id: ProgramId,
    pub version_id: VersionId,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub parameters: Value,
    pub results: ExecutionResults,
    pub resource_usage: ResourceUsage,
    pub schema_version: u32,
    pub version: u64,
}

impl Execution {
    pub fn new(program_id: ProgramId, version_id: VersionId, user_id: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: ExecutionId::new(),
            program_id,
            version_id,
            user_id: user_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            parameters,
            results: ExecutionResults::default(),
            resource_usage: ResourceUsage::default(),
            schema_version: CURRENT_SCHEMA_VERSION,
            version: 0,
        }
    }

    /// Applies a terminal status transition. Panics if already terminal,
    /// since that would violate the monotonic-transition invariant.
    pub fn finish(&mut self, status: ExecutionStatus, results: ExecutionResults, resource_usage: ResourceUsage) {
        assert!(
            !self.status.is_terminal(),
            "execution {} already terminal ({:?})",
            self.id,
            self.status
        );
        assert!(status.is_terminal(), "finish() requires a terminal status");
        self.status = status;
        self.results = results;
        self.resource_usage = resource_usage;
        self.completed_at = Some(Utc::now());
    }
}
