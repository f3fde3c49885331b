//! Collaborative swarm: agents refine a shared result over rounds.
//!
//! Each round every still-active agent sees the previous round's merged
//! result. The merged result of a round is the sorted, de-duplicated set of
//! successful outputs. The swarm stops when two consecutive rounds merge to
//! the same set or when the round budget runs out. Agents that fail or time
//! out in a round sit out the remaining rounds.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::future::join_all;

use super::strategy::{dispatch, CoordinationStrategy, SessionContext, StrategyOutput};
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AggregatedOutcome, CoordinationPattern};
use crate::reasoning::WorkUnit;

pub struct SwarmStrategy;

#[async_trait]
impl CoordinationStrategy for SwarmStrategy {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::CollaborativeSwarm
    }

    async fn execute(&self, ctx: &SessionContext, agents: &[AgentDescriptor]) -> StrategyOutput {
        let max_rounds = ctx.config.swarm_max_rounds.max(1);
        let mut active: Vec<&AgentDescriptor> = agents.iter().collect();
        let mut outcomes = Vec::new();
        let mut previous: Option<BTreeSet<String>> = None;
        let mut rounds = 0;
        let mut converged = false;

        for round in 1..=max_rounds {
            if active.is_empty() {
                break;
            }
            let mut unit = WorkUnit::whole_task(&ctx.session_id, &ctx.task);
            unit.round = Some(round);
            unit.shared_context = previous.iter().flatten().cloned().collect();

            let results = join_all(active.iter().map(|agent| dispatch(ctx, agent, &unit))).await;
            rounds = round;

            let merged: BTreeSet<String> = results
                .iter()
                .filter(|o| o.is_success())
                .filter_map(|o| o.output.as_deref())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            active.retain(|agent| {
                results
                    .iter()
                    .any(|o| o.agent_id == agent.id && o.is_success())
            });
            outcomes.extend(results.into_iter().map(|o| o.with_unit(round as usize)));

            if merged.is_empty() {
                // Nothing new this round; keep the last good state.
                continue;
            }
            if previous.as_ref() == Some(&merged) {
                converged = true;
                break;
            }
            previous = Some(merged);
        }

        tracing::info!(
            "[Coordinator] Swarm session {} finished after {} round(s), converged: {}",
            ctx.session_id,
            rounds,
            converged
        );

        let result = match previous {
            Some(merged) => Ok(AggregatedOutcome::Converged {
                output: merged.into_iter().collect::<Vec<_>>().join("\n"),
                rounds,
                converged,
            }),
            None => Err("no swarm participant produced a result".to_string()),
        };
        StrategyOutput { outcomes, result }
    }
}

#[cfg(test)]
mod tests {
    use super::super::strategy::CoordinatorConfig;
    use super::*;
    use crate::error::ConductorError;
    use crate::models::agent::{AgentLifecycle, AutonomyLevel};
    use crate::models::approval::ActionDescriptor;
    use crate::models::coordination::{AgentOutcome, CoordinationTask};
    use crate::gate::{AuthorityGate, PolicyContext};
    use crate::models::coordination::AgentOutcomeStatus;
    use crate::orchestration::ActionGuard;
    use crate::reasoning::AgentRuntime;
    use crate::storage::MemoryStorage;
    use crate::store::ApprovalLog;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Each agent answers with its own id until it has seen another
    /// participant's answer, then adopts the alphabetically first one.
    struct Consensus;

    #[async_trait]
    impl AgentRuntime for Consensus {
        async fn perform(&self, agent: &AgentDescriptor, unit: &WorkUnit) -> Result<String, ConductorError> {
            Ok(unit
                .shared_context
                .iter()
                .min()
                .cloned()
                .unwrap_or_else(|| format!("idea-{}", agent.id)))
        }

        async fn decompose(&self, _: &AgentDescriptor, _: &CoordinationTask, _: usize) -> Result<Vec<String>, ConductorError> {
            Ok(vec![])
        }

        async fn synthesize(&self, _: &AgentDescriptor, _: &CoordinationTask, _: &[AgentOutcome]) -> Result<String, ConductorError> {
            Ok(String::new())
        }
    }

    /// Like `Consensus`, but `stuck` never answers.
    struct OneStuck;

    #[async_trait]
    impl AgentRuntime for OneStuck {
        async fn perform(&self, agent: &AgentDescriptor, unit: &WorkUnit) -> Result<String, ConductorError> {
            if agent.id == "stuck" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Consensus.perform(agent, unit).await
        }

        async fn decompose(&self, _: &AgentDescriptor, _: &CoordinationTask, _: usize) -> Result<Vec<String>, ConductorError> {
            Ok(vec![])
        }

        async fn synthesize(&self, _: &AgentDescriptor, _: &CoordinationTask, _: &[AgentOutcome]) -> Result<String, ConductorError> {
            Ok(String::new())
        }
    }

    fn context(runtime: Arc<dyn AgentRuntime>, config: CoordinatorConfig, agents: &[AgentDescriptor]) -> SessionContext {
        audited_context(runtime, config, agents).0
    }

    fn audited_context(
        runtime: Arc<dyn AgentRuntime>,
        config: CoordinatorConfig,
        agents: &[AgentDescriptor],
    ) -> (SessionContext, ApprovalLog) {
        let action = ActionDescriptor::read_only("brainstorm");
        let log = ApprovalLog::new(Arc::new(MemoryStorage::new()));
        let gate = AuthorityGate::new(PolicyContext::default(), log.clone());
        let ctx = SessionContext {
            session_id: "s".into(),
            task: CoordinationTask::new("name it", action.clone()),
            runtime,
            config,
            guard: Arc::new(ActionGuard::new(
                gate,
                action,
                agents.iter().map(|a| a.id.clone()),
                HashMap::new(),
            )),
        };
        (ctx, log)
    }

    fn agent(id: &str) -> AgentDescriptor {
        AgentDescriptor {
            id: id.into(),
            agent_type: "ideator".into(),
            description: String::new(),
            status: AgentLifecycle::Active,
            version: "1.0.0".into(),
            autonomy: AutonomyLevel::RecommendOnly,
            capabilities: vec![],
            registration_seq: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_swarm_converges_on_shared_state() {
        let agents = [agent("b"), agent("a")];
        let ctx = context(Arc::new(Consensus), CoordinatorConfig::default(), &agents);
        let out = SwarmStrategy.execute(&ctx, &agents).await;

        // Round 1: {idea-a, idea-b}; round 2: {idea-a}; round 3: {idea-a} -> converged.
        match out.result.unwrap() {
            AggregatedOutcome::Converged { output, rounds, converged } => {
                assert_eq!(output, "idea-a");
                assert_eq!(rounds, 3);
                assert!(converged);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(out.outcomes.len(), 6);
    }

    #[tokio::test]
    async fn test_swarm_respects_round_budget() {
        let agents = [agent("a"), agent("b")];
        let config = CoordinatorConfig {
            swarm_max_rounds: 1,
            ..Default::default()
        };
        let ctx = context(Arc::new(Consensus), config, &agents);
        let out = SwarmStrategy.execute(&ctx, &agents).await;
        match out.result.unwrap() {
            AggregatedOutcome::Converged { rounds, converged, .. } => {
                assert_eq!(rounds, 1);
                assert!(!converged);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_agent_sits_out_without_failing_the_swarm() {
        let agents = [agent("b"), agent("stuck"), agent("a")];
        let config = CoordinatorConfig {
            agent_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let ctx = context(Arc::new(OneStuck), config, &agents);
        let out = SwarmStrategy.execute(&ctx, &agents).await;

        match out.result.unwrap() {
            AggregatedOutcome::Converged { output, converged, .. } => {
                assert_eq!(output, "idea-a");
                assert!(converged);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let stuck: Vec<_> = out.outcomes.iter().filter(|o| o.agent_id == "stuck").collect();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].status, AgentOutcomeStatus::TimedOut);
        assert!(out
            .outcomes
            .iter()
            .filter(|o| o.agent_id != "stuck")
            .all(|o| o.is_success()));
    }

    #[tokio::test]
    async fn test_later_rounds_go_through_the_gate() {
        let agents = [agent("a"), agent("b")];
        let (ctx, log) = audited_context(Arc::new(Consensus), CoordinatorConfig::default(), &agents);
        let out = SwarmStrategy.execute(&ctx, &agents).await;
        let rounds = match out.result.unwrap() {
            AggregatedOutcome::Converged { rounds, .. } => rounds,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(rounds > 1);
        // Round 1 is covered by the session-start decision; every later
        // dispatch is audited.
        let audited = log.list().await.unwrap().len();
        assert_eq!(audited, 2 * (rounds as usize - 1));
    }
}
