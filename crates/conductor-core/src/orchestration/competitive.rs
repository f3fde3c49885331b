use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;

use super::strategy::{dispatch, CoordinationStrategy, SessionContext, StrategyOutput};
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AgentOutcome, AgentOutcomeStatus, AggregatedOutcome, CoordinationPattern};
use crate::reasoning::WorkUnit;

/// All agents race on the full task. The first valid (non-empty) result in
/// `JoinSet` completion order wins; the rest are aborted.
pub struct CompetitiveStrategy;

#[async_trait]
impl CoordinationStrategy for CompetitiveStrategy {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Competitive
    }

    async fn execute(&self, ctx: &SessionContext, agents: &[AgentDescriptor]) -> StrategyOutput {
        let mut set = JoinSet::new();
        for agent in agents {
            let ctx = ctx.clone();
            let agent = agent.clone();
            set.spawn(async move {
                let unit = WorkUnit::whole_task(&ctx.session_id, &ctx.task);
                let run = AssertUnwindSafe(dispatch(&ctx, &agent, &unit)).catch_unwind().await;
                run.unwrap_or_else(|_| {
                    AgentOutcome::unsuccessful(&agent.id, AgentOutcomeStatus::Failed, "agent task panicked", 0)
                })
            });
        }

        let mut pending: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
        let mut outcomes = Vec::with_capacity(agents.len());
        let mut winner: Option<(String, String)> = None;

        while let Some(joined) = set.join_next().await {
            let mut outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("[Coordinator] Competitive agent task failed to join: {}", e);
                    continue;
                }
            };
            pending.retain(|id| id != &outcome.agent_id);
            let empty = outcome.output.as_deref().map(str::trim).unwrap_or("").is_empty();
            if outcome.is_success() && empty {
                outcome.status = AgentOutcomeStatus::Failed;
                outcome.error = Some("empty result".to_string());
            }
            if outcome.is_success() {
                winner = Some((outcome.agent_id.clone(), outcome.output.clone().unwrap_or_default()));
                outcomes.push(outcome);
                break;
            }
            outcomes.push(outcome);
        }

        set.abort_all();
        // Losers keep whatever partial work they did; nothing is rolled back.
        let (status, reason) = if winner.is_some() {
            (AgentOutcomeStatus::Cancelled, "cancelled after another agent won")
        } else {
            (AgentOutcomeStatus::Failed, "agent task aborted")
        };
        for agent_id in pending {
            outcomes.push(AgentOutcome::unsuccessful(&agent_id, status, reason, 0));
        }

        let result = match winner {
            Some((agent_id, output)) => {
                tracing::info!("[Coordinator] Competitive session {} won by {}", ctx.session_id, agent_id);
                Ok(AggregatedOutcome::Winner { agent_id, output })
            }
            None => Err("no competing agent produced a valid result".to_string()),
        };
        StrategyOutput { outcomes, result }
    }
}
