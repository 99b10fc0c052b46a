//! `Program`, `Version`, and `UiComponent` (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ProgramId, VersionId};

use super::CURRENT_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Csharp,
    Java,
    Nodejs,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Csharp => "csharp",
            Self::Java => "java",
            Self::Nodejs => "nodejs",
        }
    }
}

/// Static program metadata. Immutable except for `current_version_id` and
/// `permissions`, which are updated by the owning repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub language: Language,
    pub ui_type: String,
    pub current_version_id: Option<VersionId>,
    pub permissions: Permissions,
    pub metadata: HashMap<String, Value>,
    pub schema_version: u32,
    /// Optimistic-concurrency counter, bumped on every persisted write.
    pub version: u64,
}

impl Program {
    pub fn new(name: impl Into<String>, language: Language, ui_type: impl Into<String>) -> Self {
        Self {
            id: ProgramId::new(),
            name: name.into(),
            language,
            ui_type: ui_type.into(),
            current_version_id: None,
            permissions: Permissions::default(),
            metadata: HashMap::new(),
            schema_version: CURRENT_SCHEMA_VERSION,
            version: 0,
        }
    }
}

/// The open question about permission enforcement is left to the external
/// identity collaborator (DESIGN.md); this struct only records the
/// creator, which the core treats as having full access by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub creator_id: Option<String>,
    pub allowed_user_ids: Vec<String>,
    pub allowed_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionFile {
    pub path: String,
    pub storage_key: String,
    pub hash: String,
    pub size: u64,
    pub file_type: String,
}

/// A numbered revision of a program's source bundle. Version numbers are
/// dense and strictly increasing per program; only `Approved` versions may
/// execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub program_id: ProgramId,
    pub number: u32,
    pub status: VersionStatus,
    pub files: Vec<VersionFile>,
    pub schema_version: u32,
    pub version: u64,
}

impl Version {
    pub fn new(program_id: ProgramId, number: u32, files: Vec<VersionFile>) -> Self {
        assert!(number >= 1, "version numbers start at 1");
        Self {
            id: VersionId::new(),
            program_id,
            number,
            status: VersionStatus::Pending,
            files,
            schema_version: CURRENT_SCHEMA_VERSION,
            version: 0,
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self.status, VersionStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiComponentStatus {
    Draft,
    Active,
    Archived,
}

/// A form/table/file-input description consumed by the stub generator
/// (C1). `configuration` is an opaque JSON tree whose `elements[]` entries
/// drive the generated language-specific stub.
///
/// The (programId, versionId) scoping model is used, per DESIGN.md's
/// resolution of the `IsGlobal` vs. version-scoped open question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiComponent {
    pub id: String,
    pub program_id: ProgramId,
    pub version_id: VersionId,
    pub component_type: String,
    pub name: String,
    pub configuration: Value,
    pub schema: Option<Value>,
    pub status: UiComponentStatus,
    pub schema_version: u32,
    pub version: u64,
}

impl UiComponent {
    /// `configuration.elements[]`, or an empty slice if absent/malformed.
    pub fn elements(&self) -> Vec<&Value> {
        self.configuration
            .get("elements")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().collect())
            .unwrap_or_default()
    }
}
