//! Multi-agent orchestration coordinator.
//!
//! `coordinate` runs one coordination pattern over a set of registered agents:
//!   1. Resolves the pattern's strategy once, from the strategy table
//!   2. Resolves candidates in the registry (retired agents are skipped)
//!   3. Gates every candidate before its first dispatch
//!   4. Parks the session on any escalation, or runs the strategy, which
//!      gates every further agent action through an [`ActionGuard`]
//!   5. Finalizes the session and records a learning insight
//!
//! Finished sessions stay queryable until `retained_sessions` newer ones
//! have finished; suspended sessions are kept until resolved.
//!
//! Per-agent failures never fail the session on their own; only the pattern's
//! aggregation rule (or a hierarchical delegate failure) does.

mod competitive;
mod guard;
mod hierarchical;
mod parallel;
mod strategy;
mod swarm;

pub use competitive::CompetitiveStrategy;
pub use guard::ActionGuard;
pub use hierarchical::{select_delegate, HierarchicalStrategy};
pub use parallel::ParallelStrategy;
pub use strategy::{CoordinationStrategy, CoordinatorConfig, SessionContext, StrategyOutput, StrategyTable};
pub use swarm::SwarmStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use crate::capabilities::{CapabilityRegistry, LEARNING_INSIGHTS};
use crate::error::ConductorError;
use crate::gate::AuthorityGate;
use crate::models::agent::AgentDescriptor;
use crate::models::approval::{ActionApprovalDecision, Decision};
use crate::models::coordination::{
    AgentOutcome, AgentOutcomeStatus, CoordinationPattern, CoordinationSession, CoordinationTask,
    EscalationResolution, PendingEscalation, SessionStatus,
};
use crate::models::insight::LearningInsight;
use crate::reasoning::AgentRuntime;
use crate::store::knowledge_store::tokenize;
use crate::store::{AgentRegistry, KnowledgeRepository};
use crate::telemetry::TelemetrySink;

// ─── Session Bookkeeping ──────────────────────────────────────────────────

struct SessionEntry {
    session: CoordinationSession,
    /// Gate-approved agents, in candidate order.
    approved: Vec<AgentDescriptor>,
    /// Agents parked on an escalated decision.
    escalated: Vec<(AgentDescriptor, ActionApprovalDecision)>,
}

struct CoordinatorInner {
    sessions: HashMap<String, SessionEntry>,
}

impl CoordinatorInner {
    /// Drop the oldest finished sessions beyond `keep`.
    fn evict_finished(&mut self, keep: usize) {
        let mut finished: Vec<(chrono::DateTime<Utc>, String)> = self
            .sessions
            .values()
            .filter(|e| e.session.status.is_terminal())
            .map(|e| (e.session.updated_at, e.session.id.clone()))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort();
        let excess = finished.len() - keep;
        for (_, id) in finished.into_iter().take(excess) {
            self.sessions.remove(&id);
        }
    }
}

// ─── Coordinator ──────────────────────────────────────────────────────────

pub struct Coordinator {
    inner: Arc<RwLock<CoordinatorInner>>,
    config: CoordinatorConfig,
    strategies: StrategyTable,
    registry: AgentRegistry,
    gate: AuthorityGate,
    knowledge: KnowledgeRepository,
    capabilities: Arc<CapabilityRegistry>,
    runtime: Arc<dyn AgentRuntime>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        registry: AgentRegistry,
        gate: AuthorityGate,
        knowledge: KnowledgeRepository,
        capabilities: Arc<CapabilityRegistry>,
        runtime: Arc<dyn AgentRuntime>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CoordinatorInner {
                sessions: HashMap::new(),
            })),
            config,
            strategies: StrategyTable::standard(),
            registry,
            gate,
            knowledge,
            capabilities,
            runtime,
            telemetry,
        }
    }

    pub async fn coordinate(
        &self,
        task: CoordinationTask,
        pattern: CoordinationPattern,
        candidate_agent_ids: &[String],
    ) -> Result<CoordinationSession, ConductorError> {
        // 1. Strategy, resolved once for the whole session
        let strategy = self.strategies.resolve(pattern, &self.capabilities)?;

        // 2. Candidates
        let candidates = self.registry.resolve_candidates(candidate_agent_ids).await?;
        if candidates.is_empty() {
            return Err(ConductorError::permanent(
                "No eligible agents for coordination (all candidates retired or none given)",
            ));
        }
        let participants = candidates.iter().map(|a| a.id.clone()).collect();
        let mut session = CoordinationSession::new(task, pattern, participants);
        tracing::info!(
            "[Coordinator] Session {} started: {} over {} agent(s)",
            session.id,
            pattern.as_str(),
            candidates.len()
        );

        // 3. Gate
        let mut approved = Vec::new();
        let mut escalated = Vec::new();
        for agent in candidates {
            match self.gate.check(&agent.id, &session.task.action, agent.autonomy).await {
                Ok(decision) => match decision.decision {
                    Decision::Allow => approved.push(agent),
                    Decision::Deny => session.outcomes.push(AgentOutcome::unsuccessful(
                        &agent.id,
                        AgentOutcomeStatus::Denied,
                        decision.reason,
                        0,
                    )),
                    Decision::Escalate => {
                        session.pending_escalations.push(PendingEscalation {
                            agent_id: agent.id.clone(),
                            decision_id: decision.id.clone(),
                            reason: decision.reason.clone(),
                        });
                        escalated.push((agent, decision));
                    }
                },
                Err(e) => {
                    tracing::warn!("[Coordinator] Gate check for {} failed: {}", agent.id, e);
                    session.outcomes.push(AgentOutcome::unsuccessful(
                        &agent.id,
                        AgentOutcomeStatus::Failed,
                        format!("gate evaluation could not be recorded: {}", e),
                        0,
                    ));
                }
            }
        }

        // 4. Park on escalation
        if !escalated.is_empty() {
            session.status = SessionStatus::Suspended;
            session.updated_at = Utc::now();
            tracing::info!(
                "[Coordinator] Session {} suspended on {} escalation(s)",
                session.id,
                escalated.len()
            );
            self.telemetry
                .emit(
                    "coordination.session.suspended",
                    json!({
                        "sessionId": session.id,
                        "pattern": pattern.as_str(),
                        "escalations": escalated.len(),
                    }),
                )
                .await;
            let snapshot = session.clone();
            self.inner.write().await.sessions.insert(
                session.id.clone(),
                SessionEntry {
                    session,
                    approved,
                    escalated,
                },
            );
            return Ok(snapshot);
        }

        // 5. Run
        let session = self.run(session, approved, HashMap::new(), strategy.as_ref()).await;
        Ok(session)
    }

    /// Apply a human decision to every escalation parked on the session and
    /// resume it.
    pub async fn resolve_escalation(
        &self,
        session_id: &str,
        resolution: EscalationResolution,
    ) -> Result<CoordinationSession, ConductorError> {
        let entry = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .sessions
                .get(session_id)
                .ok_or_else(|| ConductorError::not_found(format!("Coordination session {}", session_id)))?;
            if entry.session.status != SessionStatus::Suspended {
                return Err(ConductorError::permanent(format!(
                    "Session {} is {}, not suspended",
                    session_id,
                    entry.session.status.as_str()
                )));
            }
            // Take it out so a concurrent resolution cannot run it twice.
            inner
                .sessions
                .remove(session_id)
                .ok_or_else(|| ConductorError::not_found(format!("Coordination session {}", session_id)))?
        };

        let strategy = self.strategies.resolve(entry.session.pattern, &self.capabilities)?;
        let SessionEntry {
            mut session,
            mut approved,
            escalated,
        } = entry;

        let mut standing = HashMap::new();
        for (agent, decision) in escalated {
            let record = self
                .gate
                .record_resolution(&decision, resolution.approved, &resolution.reviewer, resolution.note.as_deref())
                .await;
            match record {
                Ok(record) if record.is_allowed() => {
                    standing.insert(agent.id.clone(), resolution.reviewer.clone());
                    approved.push(agent);
                }
                Ok(record) => session.outcomes.push(AgentOutcome::unsuccessful(
                    &agent.id,
                    AgentOutcomeStatus::Denied,
                    record.reason,
                    0,
                )),
                Err(e) => session.outcomes.push(AgentOutcome::unsuccessful(
                    &agent.id,
                    AgentOutcomeStatus::Failed,
                    format!("escalation resolution could not be recorded: {}", e),
                    0,
                )),
            }
        }
        session.pending_escalations.clear();
        session.status = SessionStatus::Running;
        tracing::info!(
            "[Coordinator] Session {} resumed by {} (approved: {})",
            session.id,
            resolution.reviewer,
            resolution.approved
        );

        // Keep registration order among approved agents.
        approved.sort_by_key(|a| {
            session
                .participants
                .iter()
                .position(|p| p == &a.id)
                .unwrap_or(usize::MAX)
        });
        Ok(self.run(session, approved, standing, strategy.as_ref()).await)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<CoordinationSession, ConductorError> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(session_id)
            .map(|e| e.session.clone())
            .ok_or_else(|| ConductorError::not_found(format!("Coordination session {}", session_id)))
    }

    pub async fn list_sessions(&self) -> Vec<CoordinationSession> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner.sessions.values().map(|e| e.session.clone()).collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    // ─── Execution ────────────────────────────────────────────────────────

    async fn run(
        &self,
        mut session: CoordinationSession,
        approved: Vec<AgentDescriptor>,
        standing: HashMap<String, String>,
        strategy: &dyn CoordinationStrategy,
    ) -> CoordinationSession {
        if approved.is_empty() {
            session.status = SessionStatus::Failed;
            session.failure_reason = Some("no agent was allowed to act".to_string());
        } else {
            let guard = ActionGuard::new(
                self.gate.clone(),
                session.task.action.clone(),
                approved.iter().map(|a| a.id.clone()),
                standing,
            );
            let ctx = SessionContext {
                session_id: session.id.clone(),
                task: session.task.clone(),
                runtime: self.runtime.clone(),
                config: self.config.clone(),
                guard: Arc::new(guard),
            };
            let output = strategy.execute(&ctx, &approved).await;
            session.outcomes.extend(output.outcomes);
            match output.result {
                Ok(aggregated) => {
                    session.aggregated = Some(aggregated);
                    session.status = SessionStatus::Completed;
                }
                Err(reason) => {
                    session.status = SessionStatus::Failed;
                    session.failure_reason = Some(reason);
                }
            }
        }
        session.updated_at = Utc::now();

        tracing::info!(
            "[Coordinator] Session {} finished: {}{}",
            session.id,
            session.status.as_str(),
            session
                .failure_reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
        self.telemetry
            .emit(
                "coordination.session.finished",
                json!({
                    "sessionId": session.id,
                    "pattern": session.pattern.as_str(),
                    "status": session.status.as_str(),
                    "outcomes": session.outcomes.len(),
                }),
            )
            .await;
        self.record_insight(&session).await;

        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                approved: Vec::new(),
                escalated: Vec::new(),
            },
        );
        inner.evict_finished(self.config.retained_sessions);
        session
    }

    /// Best effort: a failed write is logged and otherwise ignored.
    async fn record_insight(&self, session: &CoordinationSession) {
        if !self.capabilities.is_enabled(LEARNING_INSIGHTS) {
            return;
        }
        let mut topics: Vec<String> = tokenize(&session.task.description).into_iter().collect();
        topics.sort();
        topics.push(session.pattern.as_str().to_lowercase());

        let total = session.outcomes.len().max(1) as f64;
        let succeeded = session.outcomes.iter().filter(|o| o.is_success()).count() as f64;
        let content = match (&session.aggregated, &session.failure_reason) {
            (Some(aggregated), _) => format!(
                "{} session for '{}' completed: {}",
                session.pattern.as_str(),
                session.task.description,
                aggregated.summary()
            ),
            (None, Some(reason)) => format!(
                "{} session for '{}' failed: {}",
                session.pattern.as_str(),
                session.task.description,
                reason
            ),
            (None, None) => format!("{} session for '{}'", session.pattern.as_str(), session.task.description),
        };

        let insight = LearningInsight::new(
            format!("coordination:{}", session.id),
            topics,
            succeeded / total,
            content,
        );
        if let Err(e) = self.knowledge.record(&insight).await {
            tracing::warn!("[Coordinator] Failed to record insight for session {}: {}", session.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::PolicyContext;
    use crate::models::agent::{AutonomyLevel, RegisterAgentInput};
    use crate::models::approval::ActionDescriptor;
    use crate::models::coordination::AggregatedOutcome;
    use crate::reasoning::WorkUnit;
    use crate::storage::{DurableStorage, MemoryStorage};
    use crate::store::ApprovalLog;
    use crate::telemetry::MemoryTelemetry;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Reply {
        Ok(&'static str),
        Fail(&'static str),
        Panic,
    }

    /// Per-agent delay plus a reply sequence; the last reply repeats.
    #[derive(Default)]
    struct Scripted {
        scripts: HashMap<String, (u64, Vec<Reply>)>,
        calls: Mutex<HashMap<String, usize>>,
        subtasks: Vec<String>,
        decompose_fails: bool,
    }

    impl Scripted {
        fn agent(mut self, id: &str, delay_ms: u64, replies: Vec<Reply>) -> Self {
            self.scripts.insert(id.to_string(), (delay_ms, replies));
            self
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl AgentRuntime for Scripted {
        async fn perform(&self, agent: &AgentDescriptor, unit: &WorkUnit) -> Result<String, ConductorError> {
            let (delay, replies) = self.scripts.get(&agent.id).cloned().unwrap_or((0, vec![Reply::Ok("ok")]));
            let idx = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(agent.id.clone()).or_insert(0);
                *n += 1;
                *n - 1
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match &replies[idx.min(replies.len() - 1)] {
                Reply::Ok(out) => Ok(format!("{}:{}", out, unit.instruction())),
                Reply::Fail(err) => Err(ConductorError::transient(*err)),
                Reply::Panic => panic!("{} runtime crashed", agent.id),
            }
        }

        async fn decompose(&self, _: &AgentDescriptor, _: &CoordinationTask, _: usize) -> Result<Vec<String>, ConductorError> {
            if self.decompose_fails {
                return Err(ConductorError::permanent("cannot plan"));
            }
            Ok(self.subtasks.clone())
        }

        async fn synthesize(
            &self,
            delegate: &AgentDescriptor,
            _: &CoordinationTask,
            results: &[AgentOutcome],
        ) -> Result<String, ConductorError> {
            let parts: Vec<String> = results.iter().filter_map(|r| r.output.clone()).collect();
            Ok(format!("{} synthesized [{}]", delegate.id, parts.join(" | ")))
        }
    }

    struct Harness {
        coordinator: Coordinator,
        registry: AgentRegistry,
        knowledge: KnowledgeRepository,
        approvals: ApprovalLog,
        capabilities: Arc<CapabilityRegistry>,
    }

    fn harness(runtime: Arc<Scripted>) -> Harness {
        harness_with(
            runtime,
            CoordinatorConfig {
                agent_timeout: Duration::from_secs(5),
                swarm_max_rounds: 3,
                hierarchical_max_subtask_attempts: 3,
                retained_sessions: 100,
            },
        )
    }

    fn harness_with(runtime: Arc<Scripted>, config: CoordinatorConfig) -> Harness {
        let storage: Arc<dyn DurableStorage> = Arc::new(MemoryStorage::new());
        let registry = AgentRegistry::new(storage.clone());
        let knowledge = KnowledgeRepository::new(storage.clone());
        let approvals = ApprovalLog::new(storage.clone());
        let capabilities = Arc::new(CapabilityRegistry::new());
        let policy = PolicyContext {
            allowlist: vec!["summarize".into()],
            denylist: vec!["wipe".into()],
            ..Default::default()
        };
        let coordinator = Coordinator::new(
            config,
            registry.clone(),
            AuthorityGate::new(policy, approvals.clone()),
            knowledge.clone(),
            capabilities.clone(),
            runtime,
            Arc::new(MemoryTelemetry::new()),
        );
        Harness {
            coordinator,
            registry,
            knowledge,
            approvals,
            capabilities,
        }
    }

    async fn register(h: &Harness, id: &str, autonomy: AutonomyLevel) {
        h.registry
            .register(RegisterAgentInput::new("worker", autonomy).with_id(id))
            .await
            .unwrap();
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_parallel_isolates_agent_failure() {
        let runtime = Arc::new(
            Scripted::default()
                .agent("a", 0, vec![Reply::Ok("A")])
                .agent("b", 0, vec![Reply::Fail("boom")])
                .agent("c", 0, vec![Reply::Ok("C")]),
        );
        let h = harness(runtime);
        for id in ["a", "b", "c"] {
            register(&h, id, AutonomyLevel::RecommendOnly).await;
        }

        let task = CoordinationTask::new("review the release notes", ActionDescriptor::read_only("review"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Parallel, &ids(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.status.is_terminal());
        assert_eq!(session.outcomes.len(), 3);
        assert!(session.outcome_for("a").unwrap().is_success());
        assert_eq!(session.outcome_for("b").unwrap().status, AgentOutcomeStatus::Failed);
        assert!(session.outcome_for("c").unwrap().is_success());
        match session.aggregated.unwrap() {
            AggregatedOutcome::Merged { results } => assert_eq!(results.len(), 3),
            other => panic!("unexpected {:?}", other),
        }

        let insights = h.knowledge.query("release notes", 5).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert!((insights[0].confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_competitive_first_valid_result_wins() {
        let runtime = Arc::new(
            Scripted::default()
                .agent("slow", 50, vec![Reply::Ok("slow")])
                .agent("fast", 10, vec![Reply::Ok("fast")])
                .agent("broken", 5, vec![Reply::Fail("crashed")]),
        );
        let h = harness(runtime);
        for id in ["slow", "fast", "broken"] {
            register(&h, id, AutonomyLevel::FullyAutonomous).await;
        }

        let task = CoordinationTask::new("pick a name", ActionDescriptor::read_only("propose"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Competitive, &ids(&["slow", "fast", "broken"]))
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.aggregated,
            Some(AggregatedOutcome::Winner {
                agent_id: "fast".into(),
                output: "fast:pick a name".into(),
            })
        );
        assert_eq!(session.outcome_for("broken").unwrap().status, AgentOutcomeStatus::Failed);
        assert_eq!(session.outcome_for("slow").unwrap().status, AgentOutcomeStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_competitive_panicking_agent_is_recorded_as_failed() {
        let runtime = Arc::new(
            Scripted::default()
                .agent("crashy", 0, vec![Reply::Panic])
                .agent("steady", 20, vec![Reply::Ok("steady")])
                .agent("idle", 500, vec![Reply::Ok("idle")]),
        );
        let h = harness(runtime);
        for id in ["crashy", "steady", "idle"] {
            register(&h, id, AutonomyLevel::FullyAutonomous).await;
        }

        let task = CoordinationTask::new("pick a name", ActionDescriptor::read_only("propose"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Competitive, &ids(&["crashy", "steady", "idle"]))
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.outcomes.len(), 3);
        let crashy = session.outcome_for("crashy").unwrap();
        assert_eq!(crashy.status, AgentOutcomeStatus::Failed);
        assert_eq!(crashy.error.as_deref(), Some("agent task panicked"));
        assert!(session.outcome_for("steady").unwrap().is_success());
        assert_eq!(session.outcome_for("idle").unwrap().status, AgentOutcomeStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_escalation_parks_session_until_resolved() {
        let runtime = Arc::new(Scripted::default());
        let h = harness(runtime.clone());
        register(&h, "advisor", AutonomyLevel::RecommendOnly).await;

        let task = CoordinationTask::new("rotate credentials", ActionDescriptor::mutating("rotate"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Parallel, &ids(&["advisor"]))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Suspended);
        assert_eq!(session.pending_escalations.len(), 1);
        assert_eq!(runtime.total_calls(), 0);

        let resumed = h
            .coordinator
            .resolve_escalation(
                &session.id,
                EscalationResolution {
                    approved: true,
                    reviewer: "oncall".into(),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(resumed.status, SessionStatus::Completed);
        assert!(resumed.pending_escalations.is_empty());
        assert_eq!(runtime.total_calls(), 1);

        let trail = h.approvals.list_by_agent("advisor").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().any(|d| d.decision == Decision::Escalate));
        assert!(trail.iter().any(|d| d.decision == Decision::Allow));

        // Already finished: cannot be resolved again.
        let again = h
            .coordinator
            .resolve_escalation(
                &session.id,
                EscalationResolution {
                    approved: true,
                    reviewer: "oncall".into(),
                    note: None,
                },
            )
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_denied_agents_fail_the_session() {
        let runtime = Arc::new(Scripted::default());
        let h = harness(runtime.clone());
        register(&h, "root", AutonomyLevel::FullyAutonomous).await;

        let task = CoordinationTask::new("clean up", ActionDescriptor::mutating("wipe"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Parallel, &ids(&["root"]))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.outcome_for("root").unwrap().status, AgentOutcomeStatus::Denied);
        assert_eq!(runtime.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_hierarchical_retries_and_synthesizes() {
        let runtime = Arc::new(Scripted {
            subtasks: vec!["gather".into(), "analyze".into()],
            ..Scripted::default()
                .agent("w1", 0, vec![Reply::Fail("flaky"), Reply::Ok("w1")])
                .agent("w2", 0, vec![Reply::Ok("w2")])
        });
        let h = harness(runtime);
        register(&h, "w1", AutonomyLevel::ActWithConfirmation).await;
        register(&h, "lead", AutonomyLevel::FullyAutonomous).await;
        register(&h, "w2", AutonomyLevel::ActWithConfirmation).await;

        let task = CoordinationTask::new("quarterly report", ActionDescriptor::mutating("summarize"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Hierarchical, &ids(&["w1", "lead", "w2"]))
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        match session.aggregated.as_ref().unwrap() {
            AggregatedOutcome::Synthesized { delegate_id, output } => {
                assert_eq!(delegate_id, "lead");
                assert_eq!(output, "lead synthesized [w1:gather | w2:analyze]");
            }
            other => panic!("unexpected {:?}", other),
        }
        let w1_attempts: Vec<_> = session.outcomes.iter().filter(|o| o.agent_id == "w1").collect();
        assert_eq!(w1_attempts.len(), 2);
        assert_eq!(w1_attempts[0].unit, Some(0));

        // Three session-start checks, then the w1 retry and the synthesis.
        assert_eq!(h.approvals.list().await.unwrap().len(), 5);
        assert_eq!(h.approvals.list_by_agent("lead").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hierarchical_delegate_failure_fails_session() {
        let runtime = Arc::new(Scripted {
            decompose_fails: true,
            ..Scripted::default()
        });
        let h = harness(runtime);
        register(&h, "lead", AutonomyLevel::FullyAutonomous).await;
        register(&h, "w1", AutonomyLevel::FullyAutonomous).await;

        let task = CoordinationTask::new("plan", ActionDescriptor::read_only("plan"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Hierarchical, &ids(&["lead", "w1"]))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.failure_reason.unwrap().contains("lead"));
    }

    #[tokio::test]
    async fn test_disabled_pattern_and_unknown_agents_rejected() {
        let h = harness(Arc::new(Scripted::default()));
        register(&h, "a", AutonomyLevel::FullyAutonomous).await;
        h.capabilities
            .set_capability_enabled(crate::capabilities::COMPETITIVE, false)
            .unwrap();

        let task = CoordinationTask::new("x", ActionDescriptor::read_only("x"));
        let err = h
            .coordinator
            .coordinate(task.clone(), CoordinationPattern::Competitive, &ids(&["a"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Permanent);

        let err = h
            .coordinator
            .coordinate(task, CoordinationPattern::Parallel, &ids(&["ghost"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_denied_agent_does_not_stop_co_participants() {
        let runtime = Arc::new(
            Scripted::default()
                .agent("a", 0, vec![Reply::Ok("A")])
                .agent("b", 0, vec![Reply::Ok("B")]),
        );
        let h = harness(runtime.clone());
        register(&h, "root", AutonomyLevel::FullyAutonomous).await;
        register(&h, "a", AutonomyLevel::RecommendOnly).await;
        register(&h, "b", AutonomyLevel::RecommendOnly).await;

        let task = CoordinationTask::new("inspect disks", ActionDescriptor::read_only("wipe"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Parallel, &ids(&["root", "a", "b"]))
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.outcome_for("root").unwrap().status, AgentOutcomeStatus::Denied);
        assert!(session.outcome_for("a").unwrap().is_success());
        assert!(session.outcome_for("b").unwrap().is_success());
        assert_eq!(runtime.total_calls(), 2);
        let root_trail = h.approvals.list_by_agent("root").await.unwrap();
        assert_eq!(root_trail.len(), 1);
        assert_eq!(root_trail[0].decision, Decision::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_competitive_timed_out_agent_is_excluded() {
        let config = CoordinatorConfig {
            agent_timeout: Duration::from_secs(3),
            ..CoordinatorConfig::default()
        };
        let runtime = Arc::new(
            Scripted::default()
                .agent("stuck", 60_000, vec![Reply::Ok("never")])
                .agent("steady", 500, vec![Reply::Ok("steady")]),
        );
        let h = harness_with(runtime, config.clone());
        register(&h, "stuck", AutonomyLevel::FullyAutonomous).await;
        register(&h, "steady", AutonomyLevel::FullyAutonomous).await;

        let task = CoordinationTask::new("find the root cause", ActionDescriptor::read_only("investigate"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Competitive, &ids(&["stuck", "steady"]))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.aggregated,
            Some(AggregatedOutcome::Winner {
                agent_id: "steady".into(),
                output: "steady:find the root cause".into(),
            })
        );
        assert_eq!(session.outcome_for("stuck").unwrap().status, AgentOutcomeStatus::Cancelled);

        // No valid result at all: the stuck agent's timeout ends the race and
        // each agent keeps its own outcome.
        let runtime = Arc::new(
            Scripted::default()
                .agent("stuck", 60_000, vec![Reply::Ok("never")])
                .agent("broken", 1_000, vec![Reply::Fail("crashed")]),
        );
        let h = harness_with(runtime, config);
        register(&h, "stuck", AutonomyLevel::FullyAutonomous).await;
        register(&h, "broken", AutonomyLevel::FullyAutonomous).await;
        let task = CoordinationTask::new("find the root cause", ActionDescriptor::read_only("investigate"));
        let session = h
            .coordinator
            .coordinate(task, CoordinationPattern::Competitive, &ids(&["stuck", "broken"]))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.outcome_for("stuck").unwrap().status, AgentOutcomeStatus::TimedOut);
        assert_eq!(session.outcome_for("broken").unwrap().status, AgentOutcomeStatus::Failed);
    }

    #[tokio::test]
    async fn test_finished_sessions_are_evicted_oldest_first() {
        let h = harness_with(
            Arc::new(Scripted::default()),
            CoordinatorConfig {
                retained_sessions: 2,
                ..CoordinatorConfig::default()
            },
        );
        register(&h, "a", AutonomyLevel::FullyAutonomous).await;

        let mut session_ids = Vec::new();
        for i in 0..3 {
            let task = CoordinationTask::new(format!("task {}", i), ActionDescriptor::read_only("scan"));
            let session = h
                .coordinator
                .coordinate(task, CoordinationPattern::Parallel, &ids(&["a"]))
                .await
                .unwrap();
            session_ids.push(session.id);
        }

        let err = h.coordinator.get_session(&session_ids[0]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(h.coordinator.get_session(&session_ids[2]).await.is_ok());
        assert_eq!(h.coordinator.list_sessions().await.len(), 2);
    }
}
