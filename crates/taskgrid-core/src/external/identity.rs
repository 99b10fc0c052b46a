//! `IdentityProvider`: the external identity/permissions collaborator
//! (spec §6, §9). The core deliberately leaves permission enforcement to
//! this collaborator; see DESIGN.md for the resolved open question on
//! default-deny vs. creator-has-full-access.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
    Execute,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Program,
    Version,
    Workflow,
    Execution,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn user_id(&self) -> Option<String>;
    async fn has_access(&self, user_id: &str, resource_type: ResourceType, resource_id: &str, level: AccessLevel) -> bool;
    async fn groups_of(&self, user_id: &str) -> Vec<String>;
}

/// Reference implementation: every known user has every access level.
/// Exists only so the crate's own tests don't need a real identity
/// backend; production deployments supply their own `IdentityProvider`.
pub struct PermissiveIdentityProvider {
    current_user: Option<String>,
}

impl PermissiveIdentityProvider {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            current_user: Some(current_user.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { current_user: None }
    }
}

#[async_trait]
impl IdentityProvider for PermissiveIdentityProvider {
    fn user_id(&self) -> Option<String> {
        self.current_user.clone()
    }

    async fn has_access(&self, _user_id: &str, _resource_type: ResourceType, _resource_id: &str, _level: AccessLevel) -> bool {
        true
    }

    async fn groups_of(&self, _user_id: &str) -> Vec<String> {
        Vec::new()
    }
}
