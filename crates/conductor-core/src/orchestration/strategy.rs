//! Pattern → strategy table and the dispatch primitive shared by strategies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::competitive::CompetitiveStrategy;
use super::guard::ActionGuard;
use super::hierarchical::HierarchicalStrategy;
use super::parallel::ParallelStrategy;
use super::swarm::SwarmStrategy;
use crate::capabilities::{self, CapabilityRegistry};
use crate::error::ConductorError;
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AgentOutcome, AgentOutcomeStatus, AggregatedOutcome, CoordinationPattern, CoordinationTask};
use crate::reasoning::{AgentRuntime, WorkUnit};

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Budget for one agent action (one dispatch, one decompose/synthesize call).
    pub agent_timeout: Duration,
    pub swarm_max_rounds: u32,
    /// Attempts per hierarchical sub-task, across retries and reassignments.
    pub hierarchical_max_subtask_attempts: u32,
    /// Finished sessions kept for `get_session`; the oldest are evicted first.
    pub retained_sessions: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(120),
            swarm_max_rounds: 5,
            hierarchical_max_subtask_attempts: 3,
            retained_sessions: 1000,
        }
    }
}

/// Everything a strategy needs for one session run. Cheap to clone so
/// strategies can move it into spawned tasks.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub task: CoordinationTask,
    pub runtime: Arc<dyn AgentRuntime>,
    pub config: CoordinatorConfig,
    pub guard: Arc<ActionGuard>,
}

/// Per-agent outcomes plus either the aggregated result or the reason the
/// session failed.
#[derive(Debug)]
pub struct StrategyOutput {
    pub outcomes: Vec<AgentOutcome>,
    pub result: Result<AggregatedOutcome, String>,
}

#[async_trait]
pub trait CoordinationStrategy: Send + Sync {
    fn pattern(&self) -> CoordinationPattern;

    /// Run the pattern over gate-approved agents (never empty).
    async fn execute(&self, ctx: &SessionContext, agents: &[AgentDescriptor]) -> StrategyOutput;
}

/// Gate, then dispatch one work unit with the per-agent timeout applied.
pub(crate) async fn dispatch(ctx: &SessionContext, agent: &AgentDescriptor, unit: &WorkUnit) -> AgentOutcome {
    if let Err(outcome) = ctx.guard.authorize(agent).await {
        return outcome;
    }
    let started = Instant::now();
    let result = tokio::time::timeout(ctx.config.agent_timeout, ctx.runtime.perform(agent, unit)).await;
    let elapsed = started.elapsed().as_millis() as u64;
    match result {
        Ok(Ok(output)) => AgentOutcome::succeeded(&agent.id, output, elapsed),
        Ok(Err(e)) => AgentOutcome::unsuccessful(&agent.id, AgentOutcomeStatus::Failed, e.to_string(), elapsed),
        Err(_) => AgentOutcome::unsuccessful(
            &agent.id,
            AgentOutcomeStatus::TimedOut,
            format!("agent action exceeded {:?}", ctx.config.agent_timeout),
            elapsed,
        ),
    }
}

struct StrategyEntry {
    capability: &'static str,
    strategy: Arc<dyn CoordinationStrategy>,
}

/// Maps each pattern to exactly one strategy, gated by a capability.
pub struct StrategyTable {
    entries: HashMap<CoordinationPattern, StrategyEntry>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl StrategyTable {
    pub fn standard() -> Self {
        let strategies: Vec<Arc<dyn CoordinationStrategy>> = vec![
            Arc::new(ParallelStrategy),
            Arc::new(HierarchicalStrategy),
            Arc::new(CompetitiveStrategy),
            Arc::new(SwarmStrategy),
        ];
        let entries = strategies
            .into_iter()
            .map(|strategy| {
                let pattern = strategy.pattern();
                (
                    pattern,
                    StrategyEntry {
                        capability: capabilities::pattern_capability(pattern),
                        strategy,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn resolve(
        &self,
        pattern: CoordinationPattern,
        caps: &CapabilityRegistry,
    ) -> Result<Arc<dyn CoordinationStrategy>, ConductorError> {
        let entry = self.entries.get(&pattern).ok_or_else(|| {
            ConductorError::permanent(format!("No strategy registered for {}", pattern.as_str()))
        })?;
        if !caps.is_enabled(entry.capability) {
            return Err(ConductorError::permanent(format!(
                "Coordination pattern {} is disabled (capability {})",
                pattern.as_str(),
                entry.capability
            )));
        }
        Ok(entry.strategy.clone())
    }
}
