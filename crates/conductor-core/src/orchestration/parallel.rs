use async_trait::async_trait;
use futures::future::join_all;

use super::strategy::{dispatch, CoordinationStrategy, SessionContext, StrategyOutput};
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AggregatedOutcome, CoordinationPattern};
use crate::reasoning::WorkUnit;

/// Every agent runs the same task; the session waits for all of them.
pub struct ParallelStrategy;

#[async_trait]
impl CoordinationStrategy for ParallelStrategy {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Parallel
    }

    async fn execute(&self, ctx: &SessionContext, agents: &[AgentDescriptor]) -> StrategyOutput {
        let unit = WorkUnit::whole_task(&ctx.session_id, &ctx.task);
        let outcomes = join_all(agents.iter().map(|agent| dispatch(ctx, agent, &unit))).await;

        let result = if outcomes.iter().any(|o| o.is_success()) {
            Ok(AggregatedOutcome::Merged {
                results: outcomes.clone(),
            })
        } else {
            Err(format!("all {} parallel agents failed", outcomes.len()))
        };
        StrategyOutput { outcomes, result }
    }
}
