use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ConductorError;
use crate::models::agent::{AgentDescriptor, AgentLifecycle, RegisterAgentInput, UpdateAgentInput};
use crate::storage::{self, DurableStorage, KeyedLocks};

const PREFIX: &str = "agents/";
const REGISTRATION_LOCK: &str = "__registration__";

/// CRUD over agent descriptors. Nothing is ever hard-deleted: retirement is a
/// lifecycle transition and retired agents stay queryable for audit.
#[derive(Clone)]
pub struct AgentRegistry {
    storage: Arc<dyn DurableStorage>,
    locks: KeyedLocks,
}

impl AgentRegistry {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn register(&self, input: RegisterAgentInput) -> Result<AgentDescriptor, ConductorError> {
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if id.is_empty() || id.contains('/') {
            return Err(ConductorError::permanent(format!("Invalid agent id: '{}'", id)));
        }
        if input.agent_type.trim().is_empty() {
            return Err(ConductorError::permanent("Agent type must not be empty"));
        }

        let _guard = self.locks.lock(REGISTRATION_LOCK).await;
        if self.find(&id).await?.is_some() {
            return Err(ConductorError::permanent(format!("Agent already registered: {}", id)));
        }

        let registration_seq = self
            .all()
            .await?
            .iter()
            .map(|a| a.registration_seq + 1)
            .max()
            .unwrap_or(0);
        let now = Utc::now();
        let agent = AgentDescriptor {
            id,
            agent_type: input.agent_type,
            description: input.description,
            status: AgentLifecycle::Active,
            version: input.version,
            autonomy: input.autonomy,
            capabilities: input.capabilities,
            registration_seq,
            created_at: now,
            updated_at: now,
        };
        storage::put_json(self.storage.as_ref(), &agent_key(&agent.id), &agent).await?;
        tracing::info!(
            "[AgentRegistry] Registered agent {} ({}, {})",
            agent.id,
            agent.agent_type,
            agent.autonomy.as_str()
        );
        Ok(agent)
    }

    pub async fn get_by_id(&self, agent_id: &str) -> Result<AgentDescriptor, ConductorError> {
        self.find(agent_id)
            .await?
            .ok_or_else(|| ConductorError::not_found(format!("Agent not found: {}", agent_id)))
    }

    /// Agents in registration order; retired agents only when asked for.
    pub async fn list(&self, include_retired: bool) -> Result<Vec<AgentDescriptor>, ConductorError> {
        let mut agents = self.all().await?;
        if !include_retired {
            agents.retain(|a| !a.is_retired());
        }
        agents.sort_by_key(|a| a.registration_seq);
        Ok(agents)
    }

    /// Apply a capability or authority change.
    pub async fn update(
        &self,
        agent_id: &str,
        input: UpdateAgentInput,
    ) -> Result<AgentDescriptor, ConductorError> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.get_by_id(agent_id).await?;
        if agent.is_retired() {
            return Err(ConductorError::permanent(format!(
                "Agent {} is retired and can no longer be changed",
                agent_id
            )));
        }
        if let Some(v) = input.description { agent.description = v; }
        if let Some(v) = input.version { agent.version = v; }
        if let Some(v) = input.autonomy { agent.autonomy = v; }
        if let Some(v) = input.capabilities { agent.capabilities = v; }
        agent.updated_at = Utc::now();
        storage::put_json(self.storage.as_ref(), &agent_key(agent_id), &agent).await?;
        Ok(agent)
    }

    pub async fn deprecate(&self, agent_id: &str) -> Result<AgentDescriptor, ConductorError> {
        self.transition(agent_id, AgentLifecycle::Deprecated).await
    }

    /// Retire an agent. Idempotent.
    pub async fn retire(&self, agent_id: &str) -> Result<AgentDescriptor, ConductorError> {
        self.transition(agent_id, AgentLifecycle::Retired).await
    }

    /// Resolve candidate ids for a coordination session, in the order given.
    ///
    /// Unknown ids are an error; retired agents are skipped.
    pub async fn resolve_candidates(&self, agent_ids: &[String]) -> Result<Vec<AgentDescriptor>, ConductorError> {
        let mut candidates = Vec::with_capacity(agent_ids.len());
        for id in agent_ids {
            let agent = self.get_by_id(id).await?;
            if agent.is_retired() {
                tracing::warn!("[AgentRegistry] Skipping retired agent {} as candidate", id);
                continue;
            }
            if candidates.iter().any(|c: &AgentDescriptor| c.id == agent.id) {
                continue;
            }
            candidates.push(agent);
        }
        Ok(candidates)
    }

    async fn transition(
        &self,
        agent_id: &str,
        target: AgentLifecycle,
    ) -> Result<AgentDescriptor, ConductorError> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.get_by_id(agent_id).await?;
        if agent.status == target {
            return Ok(agent);
        }
        if agent.is_retired() {
            return Err(ConductorError::permanent(format!(
                "Agent {} is retired; cannot move to {}",
                agent_id,
                target.as_str()
            )));
        }
        agent.status = target;
        agent.updated_at = Utc::now();
        storage::put_json(self.storage.as_ref(), &agent_key(agent_id), &agent).await?;
        tracing::info!("[AgentRegistry] Agent {} is now {}", agent_id, target.as_str());
        Ok(agent)
    }

    async fn find(&self, agent_id: &str) -> Result<Option<AgentDescriptor>, ConductorError> {
        storage::get_json(self.storage.as_ref(), &agent_key(agent_id)).await
    }

    async fn all(&self) -> Result<Vec<AgentDescriptor>, ConductorError> {
        storage::list_json(self.storage.as_ref(), PREFIX).await
    }
}

fn agent_key(agent_id: &str) -> String {
    format!("{}{}", PREFIX, agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::agent::AutonomyLevel;
    use crate::storage::MemoryStorage;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_register_assigns_registration_order() {
        let registry = registry();
        let a = registry
            .register(RegisterAgentInput::new("planner", AutonomyLevel::FullyAutonomous).with_id("zeta"))
            .await
            .unwrap();
        let b = registry
            .register(RegisterAgentInput::new("coder", AutonomyLevel::RecommendOnly).with_id("alpha"))
            .await
            .unwrap();
        assert_eq!(a.registration_seq, 0);
        assert_eq!(b.registration_seq, 1);
        assert_eq!(a.status, AgentLifecycle::Active);

        // Registration order, not key order.
        let ids: Vec<String> = registry.list(false).await.unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["zeta".to_string(), "alpha".to_string()]);

        let dup = registry
            .register(RegisterAgentInput::new("coder", AutonomyLevel::RecommendOnly).with_id("alpha"))
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_retire_is_a_status_transition() {
        let registry = registry();
        registry
            .register(RegisterAgentInput::new("coder", AutonomyLevel::ActWithConfirmation).with_id("a1"))
            .await
            .unwrap();

        let retired = registry.retire("a1").await.unwrap();
        assert_eq!(retired.status, AgentLifecycle::Retired);
        // Idempotent.
        registry.retire("a1").await.unwrap();

        assert!(registry.list(false).await.unwrap().is_empty());
        assert_eq!(registry.list(true).await.unwrap().len(), 1);
        assert_eq!(registry.get_by_id("a1").await.unwrap().status, AgentLifecycle::Retired);

        let err = registry.deprecate("a1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        let err = registry
            .update("a1", UpdateAgentInput { version: Some("2".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_update_and_resolve_candidates() {
        let registry = registry();
        for id in ["a", "b", "c"] {
            registry
                .register(RegisterAgentInput::new("worker", AutonomyLevel::RecommendOnly).with_id(id))
                .await
                .unwrap();
        }
        let updated = registry
            .update(
                "b",
                UpdateAgentInput {
                    autonomy: Some(AutonomyLevel::FullyAutonomous),
                    capabilities: Some(vec!["deploy".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.autonomy, AutonomyLevel::FullyAutonomous);
        assert_eq!(updated.capabilities, vec!["deploy".to_string()]);

        registry.retire("c").await.unwrap();
        let ids = vec!["b".to_string(), "c".to_string(), "a".to_string(), "b".to_string()];
        let resolved: Vec<String> = registry
            .resolve_candidates(&ids)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(resolved, vec!["b".to_string(), "a".to_string()]);

        let err = registry.resolve_candidates(&["ghost".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
