//! UI-Interaction Session Manager (C9): tracks pending `UiInteraction`s and
//! resolves the scheduler's waiter on submission, cancellation, or
//! timeout. New module, grounded in the teacher's `SupervisorHandle`
//! oneshot-cancel idiom. Uses a `Mutex<HashMap<..>>` registry rather than
//! an external concurrent-map crate, consistent with C4's DashMap-free
//! design (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::domain::{UiInteraction, UiInteractionStatus};
use crate::error::{Result, TaskGridError};
use crate::ids::InteractionId;

/// How C9 resolved the scheduler's wait on a UI interaction.
#[derive(Debug, Clone)]
pub enum UiResolution {
    Submitted(Value),
    Cancelled,
    TimedOut,
}

struct Session {
    interaction: Mutex<UiInteraction>,
    waiter: Mutex<Option<oneshot::Sender<UiResolution>>>,
}

/// Manages pending UI interactions and their scheduler waiters. A single
/// background sweep task (spawned once via `spawn_timeout_sweep`, not one
/// per session) resolves expired interactions.
pub struct UiSessionManager {
    sessions: Mutex<HashMap<InteractionId, Arc<Session>>>,
}

impl UiSessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a new interaction and returns a receiver C8 awaits on
    /// without holding a concurrency slot.
    pub async fn create(&self, interaction: UiInteraction) -> oneshot::Receiver<UiResolution> {
        let (tx, rx) = oneshot::channel();
        let id = interaction.id;
        let session = Arc::new(Session {
            interaction: Mutex::new(interaction),
            waiter: Mutex::new(Some(tx)),
        });
        self.sessions.lock().await.insert(id, session);
        rx
    }

    /// Submits output data, transitioning the interaction to `Completed`
    /// and resolving its waiter.
    pub async fn submit(&self, id: InteractionId, output: Value) -> Result<()> {
        let session = self.get(id).await?;
        {
            let mut interaction = session.interaction.lock().await;
            if interaction.status.is_terminal() {
                return Err(TaskGridError::Validation(format!("interaction {id} already resolved")));
            }
            interaction.status = UiInteractionStatus::Completed;
            interaction.output_data = Some(output.clone());
            interaction.completed_at = Some(Utc::now());
        }
        self.resolve(&session, UiResolution::Submitted(output)).await;
        self.sessions.lock().await.remove(&id);
        Ok(())
    }

    pub async fn cancel(&self, id: InteractionId) -> Result<()> {
        let session = self.get(id).await?;
        {
            let mut interaction = session.interaction.lock().await;
            if interaction.status.is_terminal() {
                return Ok(());
            }
            interaction.status = UiInteractionStatus::Cancelled;
            interaction.completed_at = Some(Utc::now());
        }
        self.resolve(&session, UiResolution::Cancelled).await;
        self.sessions.lock().await.remove(&id);
        Ok(())
    }

    pub async fn get_interaction(&self, id: InteractionId) -> Result<UiInteraction> {
        let session = self.get(id).await?;
        Ok(session.interaction.lock().await.clone())
    }

    /// Finds the pending interaction for a given workflow execution, if
    /// any. Lets an external caller (CLI, API) discover which interaction
    /// to `submit` against without already knowing its `InteractionId`.
    pub async fn pending_for_execution(&self, workflow_execution_id: crate::ids::ExecutionId) -> Option<UiInteraction> {
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let interaction = session.interaction.lock().await;
            if interaction.workflow_execution_id == workflow_execution_id && !interaction.status.is_terminal() {
                return Some(interaction.clone());
            }
        }
        None
    }

    async fn get(&self, id: InteractionId) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| TaskGridError::NotFound(format!("ui interaction {id}")))
    }

    async fn resolve(&self, session: &Session, resolution: UiResolution) {
        if let Some(waiter) = session.waiter.lock().await.take() {
            let _ = waiter.send(resolution);
        }
    }

    /// Spawns the single background sweep task. Must be called once per
    /// manager instance.
    pub fn spawn_timeout_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.sweep_expired().await;
            }
        });
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<InteractionId> = {
            let sessions = self.sessions.lock().await;
            let mut ids = Vec::new();
            for (id, session) in sessions.iter() {
                let interaction = session.interaction.lock().await;
                if !interaction.status.is_terminal() && interaction.is_expired(now) {
                    ids.push(*id);
                }
            }
            ids
        };

        for id in expired {
            if let Ok(session) = self.get(id).await {
                {
                    let mut interaction = session.interaction.lock().await;
                    interaction.status = UiInteractionStatus::Timeout;
                    interaction.completed_at = Some(now);
                }
                warn!(%id, "ui interaction timed out");
                self.resolve(&session, UiResolution::TimedOut).await;
                self.sessions.lock().await.remove(&id);
            }
        }
        info!("ui interaction timeout sweep complete");
    }
}

impl Default for UiSessionManager {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InteractionType;
    use crate::ids::{ExecutionId, NodeId};
    use serde_json::json;

    fn sample_interaction(timeout: Option<chrono::Duration>) -> UiInteraction {
        UiInteraction::new(ExecutionId::new(), NodeId::new(), InteractionType::UserInput, json!({}), timeout)
    }

    #[tokio::test]
    async fn submit_resolves_waiter_with_output() {
        let manager = UiSessionManager::new();
        let interaction = sample_interaction(None);
        let id = interaction.id;
        let rx = manager.create(interaction).await;

        manager.submit(id, json!({"answer": 42})).await.unwrap();

        let resolution = rx.await.unwrap();
        assert!(matches!(resolution, UiResolution::Submitted(v) if v == json!({"answer": 42})));

        let stored = manager.get_interaction(id).await;
        assert!(stored.is_err(), "resolved sessions are removed from the registry");
    }

    #[tokio::test]
    async fn cancel_resolves_waiter_with_cancelled() {
        let manager = UiSessionManager::new();
        let interaction = sample_interaction(None);
        let id = interaction.id;
        let rx = manager.create(interaction).await;

        manager.cancel(id).await.unwrap();
        let resolution = rx.await.unwrap();
        assert!(matches!(resolution, UiResolution::Cancelled));
    }

    #[tokio::test]
    async fn double_submit_returns_validation_error() {
        let manager = UiSessionManager::new();
        let interaction = sample_interaction(None);
        let id = interaction.id;
        let _rx = manager.create(interaction).await;

        manager.submit(id, json!({"a": 1})).await.unwrap();
        let err = manager.submit(id, json!({"a": 2})).await.unwrap_err();
        assert!(matches!(err, TaskGridError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_for_execution_finds_unresolved_interaction() {
        let manager = UiSessionManager::new();
        let interaction = sample_interaction(None);
        let eid = interaction.workflow_execution_id;
        let id = interaction.id;
        let _rx = manager.create(interaction).await;

        let found = manager.pending_for_execution(eid).await.unwrap();
        assert_eq!(found.id, id);

        manager.submit(id, json!({})).await.unwrap();
        assert!(manager.pending_for_execution(eid).await.is_none());
    }

    #[tokio::test]
    async fn sweep_resolves_expired_interactions_as_timed_out() {
        let manager = UiSessionManager::new();
        let interaction = sample_interaction(Some(chrono::Duration::milliseconds(10)));
        let id = interaction.id;
        let rx = manager.create(interaction).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.sweep_expired().await;

        let resolution = rx.await.unwrap();
        assert!(matches!(resolution, UiResolution::TimedOut));
        assert!(manager.get_interaction(id).await.is_err());
    }
}
