//! Hierarchical coordination: one delegate plans, workers execute, the
//! delegate synthesizes.
//!
//! The delegate is the candidate with the highest autonomy level; ties go to
//! the earliest registration. Sub-tasks are assigned round-robin over the
//! remaining agents (or to the delegate itself when it is alone). A failed
//! sub-task is reported back to the delegate, which decides whether to retry
//! it on the same worker, reassign it to the next worker, or fail the session.
//! A worker denied by the gate is skipped for the rest of the session without
//! asking the delegate. The delegate's own planning and synthesis calls are
//! gated like any other action.

use std::cmp::Reverse;

use async_trait::async_trait;
use futures::future::join_all;

use super::strategy::{dispatch, CoordinationStrategy, SessionContext, StrategyOutput};
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AgentOutcome, AgentOutcomeStatus, AggregatedOutcome, CoordinationPattern};
use crate::reasoning::{SubtaskFailurePolicy, WorkUnit};
use crate::storage::KeyedLocks;

pub struct HierarchicalStrategy;

/// Pick the delegate: max autonomy, then lowest registration sequence.
pub fn select_delegate(agents: &[AgentDescriptor]) -> Option<&AgentDescriptor> {
    agents
        .iter()
        .max_by_key(|a| (a.autonomy, Reverse(a.registration_seq)))
}

struct SubtaskRun {
    attempts: Vec<AgentOutcome>,
    /// Set when the delegate asked to fail the whole session.
    fatal: Option<String>,
}

impl HierarchicalStrategy {
    async fn run_subtask(
        ctx: &SessionContext,
        delegate: &AgentDescriptor,
        workers: &[&AgentDescriptor],
        locks: &KeyedLocks,
        index: usize,
        subtask: &str,
    ) -> SubtaskRun {
        let mut unit = WorkUnit::whole_task(&ctx.session_id, &ctx.task);
        unit.subtask = Some(subtask.to_string());

        let max_attempts = ctx.config.hierarchical_max_subtask_attempts.max(1);
        let mut worker_idx = index % workers.len();
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            let Some(next) = next_eligible(ctx, workers, worker_idx) else {
                break;
            };
            worker_idx = next;
            let worker = workers[worker_idx];
            let outcome = {
                // One action at a time per agent.
                let _guard = locks.lock(&worker.id).await;
                dispatch(ctx, worker, &unit).await.with_unit(index)
            };
            let succeeded = outcome.is_success();
            let denied = outcome.status == AgentOutcomeStatus::Denied;
            attempts.push(outcome);
            if succeeded || attempt == max_attempts {
                break;
            }
            if denied {
                continue;
            }

            let policy = match attempts.last() {
                Some(failure) => ctx.runtime.on_subtask_failure(delegate, subtask, failure).await,
                None => SubtaskFailurePolicy::Retry,
            };
            match policy {
                SubtaskFailurePolicy::Retry => {}
                SubtaskFailurePolicy::Reassign => worker_idx = (worker_idx + 1) % workers.len(),
                SubtaskFailurePolicy::FailSession => {
                    return SubtaskRun {
                        attempts,
                        fatal: Some(format!(
                            "delegate {} failed the session after sub-task {} failed",
                            delegate.id, index
                        )),
                    };
                }
            }
        }

        SubtaskRun { attempts, fatal: None }
    }
}

#[async_trait]
impl CoordinationStrategy for HierarchicalStrategy {
    fn pattern(&self) -> CoordinationPattern {
        CoordinationPattern::Hierarchical
    }

    async fn execute(&self, ctx: &SessionContext, agents: &[AgentDescriptor]) -> StrategyOutput {
        let Some(delegate) = select_delegate(agents) else {
            return StrategyOutput {
                outcomes: Vec::new(),
                result: Err("no agents available".to_string()),
            };
        };
        let mut workers: Vec<&AgentDescriptor> = agents.iter().filter(|a| a.id != delegate.id).collect();
        if workers.is_empty() {
            workers.push(delegate);
        }
        let mut outcomes = Vec::new();
        let timeout = ctx.config.agent_timeout;

        // 1. Decompose
        if let Err(denied) = ctx.guard.authorize(delegate).await {
            return delegate_refused(outcomes, delegate, denied);
        }
        let subtasks = match tokio::time::timeout(
            timeout,
            ctx.runtime.decompose(delegate, &ctx.task, workers.len()),
        )
        .await
        {
            Ok(Ok(subtasks)) if !subtasks.is_empty() => subtasks,
            Ok(Ok(_)) => vec![ctx.task.description.clone()],
            Ok(Err(e)) => return delegate_failed(outcomes, delegate, AgentOutcomeStatus::Failed, e.to_string()),
            Err(_) => {
                return delegate_failed(
                    outcomes,
                    delegate,
                    AgentOutcomeStatus::TimedOut,
                    "decomposition timed out".to_string(),
                )
            }
        };
        tracing::info!(
            "[Coordinator] Delegate {} split session {} into {} sub-task(s)",
            delegate.id,
            ctx.session_id,
            subtasks.len()
        );

        // 2. Execute sub-tasks
        let locks = KeyedLocks::new();
        let runs = join_all(
            subtasks
                .iter()
                .enumerate()
                .map(|(i, s)| Self::run_subtask(ctx, delegate, &workers, &locks, i, s)),
        )
        .await;

        let mut finals = Vec::with_capacity(runs.len());
        let mut fatal = None;
        for run in runs {
            if let Some(last) = run.attempts.last() {
                finals.push(last.clone());
            }
            if fatal.is_none() {
                fatal = run.fatal;
            }
            outcomes.extend(run.attempts);
        }
        if let Some(reason) = fatal {
            return StrategyOutput {
                outcomes,
                result: Err(reason),
            };
        }

        // 3. Synthesize
        if let Err(denied) = ctx.guard.authorize(delegate).await {
            return delegate_refused(outcomes, delegate, denied);
        }
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(timeout, ctx.runtime.synthesize(delegate, &ctx.task, &finals)).await {
            Ok(Ok(output)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                outcomes.push(AgentOutcome::succeeded(&delegate.id, output.clone(), elapsed));
                StrategyOutput {
                    outcomes,
                    result: Ok(AggregatedOutcome::Synthesized {
                        delegate_id: delegate.id.clone(),
                        output,
                    }),
                }
            }
            Ok(Err(e)) => delegate_failed(outcomes, delegate, AgentOutcomeStatus::Failed, e.to_string()),
            Err(_) => delegate_failed(
                outcomes,
                delegate,
                AgentOutcomeStatus::TimedOut,
                "synthesis timed out".to_string(),
            ),
        }
    }
}

/// First worker at or after `from` that the gate has not excluded.
fn next_eligible(ctx: &SessionContext, workers: &[&AgentDescriptor], from: usize) -> Option<usize> {
    (0..workers.len())
        .map(|offset| (from + offset) % workers.len())
        .find(|&i| !ctx.guard.is_excluded(&workers[i].id))
}

fn delegate_refused(mut outcomes: Vec<AgentOutcome>, delegate: &AgentDescriptor, refused: AgentOutcome) -> StrategyOutput {
    let reason = format!(
        "delegate {} was not allowed to act: {}",
        delegate.id,
        refused.error.as_deref().unwrap_or("gate refused")
    );
    outcomes.push(refused);
    StrategyOutput {
        outcomes,
        result: Err(reason),
    }
}

fn delegate_failed(
    mut outcomes: Vec<AgentOutcome>,
    delegate: &AgentDescriptor,
    status: AgentOutcomeStatus,
    error: String,
) -> StrategyOutput {
    let reason = format!("delegate {} failed: {}", delegate.id, error);
    outcomes.push(AgentOutcome::unsuccessful(&delegate.id, status, error, 0));
    StrategyOutput {
        outcomes,
        result: Err(reason),
    }
}
