//! External collaborators the core consumes but never implements beyond a
//! minimal in-memory reference used by its own tests (spec §6, §1).

pub mod file_store;
pub mod identity;
pub mod repository;

pub use file_store::{FileStore, FileStoreStats, InMemoryFileStore};
pub use identity::{AccessLevel, IdentityProvider, PermissiveIdentityProvider, ResourceType};
pub use repository::{
    ExecutionRepository, InMemoryExecutionRepository, InMemoryProgramRepository, InMemoryUiInteractionRepository,
    InMemoryVersionRepository, InMemoryWorkflowExecutionRepository, InMemoryWorkflowRepository, ProgramRepository,
    UiInteractionRepository, VersionRepository, WorkflowExecutionRepository, WorkflowRepository,
};
