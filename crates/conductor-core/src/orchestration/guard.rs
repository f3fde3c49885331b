//! Per-action gating inside a running session.
//!
//! The coordinator gates every candidate once before the strategy starts;
//! that decision covers the agent's first action. Every later action
//! (another swarm round, a sub-task retry or reassignment, the delegate's
//! synthesis) goes back through the gate and is audited again.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::gate::AuthorityGate;
use crate::models::agent::AgentDescriptor;
use crate::models::approval::{ActionDescriptor, Decision};
use crate::models::coordination::{AgentOutcome, AgentOutcomeStatus};

pub struct ActionGuard {
    gate: AuthorityGate,
    action: ActionDescriptor,
    /// Agents whose escalation a reviewer approved for this session.
    standing: HashMap<String, String>,
    /// Agents whose next action is covered by the session-start decision.
    preauthorized: Mutex<HashSet<String>>,
    /// Agents removed from the rest of the session.
    excluded: Mutex<HashSet<String>>,
}

impl ActionGuard {
    pub fn new(
        gate: AuthorityGate,
        action: ActionDescriptor,
        preauthorized: impl IntoIterator<Item = String>,
        standing: HashMap<String, String>,
    ) -> Self {
        Self {
            gate,
            action,
            standing,
            preauthorized: Mutex::new(preauthorized.into_iter().collect()),
            excluded: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_excluded(&self, agent_id: &str) -> bool {
        lock(&self.excluded).contains(agent_id)
    }

    /// Gate one action. `Err` carries the outcome to report instead of
    /// dispatching.
    pub async fn authorize(&self, agent: &AgentDescriptor) -> Result<(), AgentOutcome> {
        if self.is_excluded(&agent.id) {
            return Err(denied(&agent.id, "excluded from the session after a denied action"));
        }
        if lock(&self.preauthorized).remove(&agent.id) {
            return Ok(());
        }

        let decision = match self.gate.check(&agent.id, &self.action, agent.autonomy).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("[Coordinator] Gate check for {} failed: {}", agent.id, e);
                return Err(AgentOutcome::unsuccessful(
                    &agent.id,
                    AgentOutcomeStatus::Failed,
                    format!("gate evaluation could not be recorded: {}", e),
                    0,
                ));
            }
        };
        match decision.decision {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(self.exclude(&agent.id, decision.reason)),
            Decision::Escalate => {
                let Some(reviewer) = self.standing.get(&agent.id) else {
                    return Err(self.exclude(
                        &agent.id,
                        format!("escalated without a standing approval: {}", decision.reason),
                    ));
                };
                match self
                    .gate
                    .record_resolution(&decision, true, reviewer, Some("standing approval for this session"))
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => Err(AgentOutcome::unsuccessful(
                        &agent.id,
                        AgentOutcomeStatus::Failed,
                        format!("escalation resolution could not be recorded: {}", e),
                        0,
                    )),
                }
            }
        }
    }

    fn exclude(&self, agent_id: &str, reason: String) -> AgentOutcome {
        lock(&self.excluded).insert(agent_id.to_string());
        tracing::info!("[Coordinator] Agent {} removed from session: {}", agent_id, reason);
        denied(agent_id, reason)
    }
}

fn denied(agent_id: &str, reason: impl Into<String>) -> AgentOutcome {
    AgentOutcome::unsuccessful(agent_id, AgentOutcomeStatus::Denied, reason, 0)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::PolicyContext;
    use crate::models::agent::{AgentLifecycle, AutonomyLevel};
    use crate::storage::MemoryStorage;
    use crate::store::ApprovalLog;
    use chrono::Utc;
    use std::sync::Arc;

    fn agent(id: &str, autonomy: AutonomyLevel) -> AgentDescriptor {
        AgentDescriptor {
            id: id.into(),
            agent_type: "worker".into(),
            description: String::new(),
            status: AgentLifecycle::Active,
            version: "1.0.0".into(),
            autonomy,
            capabilities: vec![],
            registration_seq: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn gate() -> (AuthorityGate, ApprovalLog) {
        let log = ApprovalLog::new(Arc::new(MemoryStorage::new()));
        (AuthorityGate::new(PolicyContext::default(), log.clone()), log)
    }

    #[tokio::test]
    async fn test_first_action_is_covered_then_every_action_is_audited() {
        let (gate, log) = gate();
        let guard = ActionGuard::new(gate, ActionDescriptor::read_only("scan"), vec!["a".to_string()], HashMap::new());
        let a = agent("a", AutonomyLevel::FullyAutonomous);

        guard.authorize(&a).await.unwrap();
        assert!(log.list().await.unwrap().is_empty());
        guard.authorize(&a).await.unwrap();
        guard.authorize(&a).await.unwrap();
        assert_eq!(log.list_by_agent("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_escalation_needs_standing_approval() {
        let (gate, log) = gate();
        let standing = HashMap::from([("reviewed".to_string(), "oncall".to_string())]);
        let guard = ActionGuard::new(gate, ActionDescriptor::mutating("rotate"), Vec::new(), standing);

        guard
            .authorize(&agent("reviewed", AutonomyLevel::RecommendOnly))
            .await
            .unwrap();
        let trail = log.list_by_agent("reviewed").await.unwrap();
        assert!(trail.iter().any(|d| d.decision == Decision::Escalate));
        assert!(trail.iter().any(|d| d.decision == Decision::Allow));

        let stranger = agent("stranger", AutonomyLevel::RecommendOnly);
        let outcome = guard.authorize(&stranger).await.unwrap_err();
        assert_eq!(outcome.status, AgentOutcomeStatus::Denied);
        assert!(guard.is_excluded("stranger"));
        // Excluded agents are not gated again.
        guard.authorize(&stranger).await.unwrap_err();
        assert_eq!(log.list_by_agent("stranger").await.unwrap().len(), 1);
    }
}
