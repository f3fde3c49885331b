//! Shared application state: every component wired over one storage backend.
//!
//! This is the in-process surface the CLI (or any embedding host) drives:
//! `start_workflow`, `cancel_workflow`, `get_workflow_status`, `coordinate`,
//! `register_agent`, `retire_agent` and `evaluate_action`.

use std::sync::Arc;

use serde_json::Value;

use crate::capabilities::CapabilityRegistry;
use crate::config::{ConductorConfig, StorageBackend, TelemetryKind};
use crate::db::Database;
use crate::error::ConductorError;
use crate::gate::AuthorityGate;
use crate::models::agent::{AgentDescriptor, RegisterAgentInput};
use crate::models::approval::{ActionApprovalDecision, ActionDescriptor};
use crate::models::coordination::{CoordinationPattern, CoordinationSession, CoordinationTask, EscalationResolution};
use crate::models::workflow::WorkflowInstance;
use crate::orchestration::Coordinator;
use crate::reasoning::{
    AgentRuntime, HttpReasoningService, ReasoningAgentRuntime, ReasoningService, UnconfiguredReasoningService,
};
use crate::storage::{DurableStorage, MemoryStorage, SqliteStorage};
use crate::store::{AgentRegistry, ApprovalLog, CheckpointStore, KnowledgeRepository};
use crate::telemetry::{JsonlTelemetry, NoopTelemetry, TelemetrySink, TracingTelemetry};
use crate::workflow::{CoordinationStep, ReasoningStep, StepRegistry, WorkflowEngine};

/// Insights prepended to agent prompts by the default runtime.
const PROMPT_INSIGHT_LIMIT: usize = 3;

pub struct AppStateInner {
    pub config: ConductorConfig,
    pub storage: Arc<dyn DurableStorage>,
    pub agents: AgentRegistry,
    pub gate: AuthorityGate,
    pub knowledge: KnowledgeRepository,
    pub capabilities: Arc<CapabilityRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub engine: WorkflowEngine,
    pub reasoning: Arc<dyn ReasoningService>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire every component. Agents run on a [`ReasoningAgentRuntime`] over
    /// `reasoning`, primed with prior insights.
    pub fn new(
        config: ConductorConfig,
        storage: Arc<dyn DurableStorage>,
        reasoning: Arc<dyn ReasoningService>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let knowledge = KnowledgeRepository::with_half_life(storage.clone(), config.knowledge.half_life_hours);
        let runtime = Arc::new(
            ReasoningAgentRuntime::new(reasoning.clone()).with_knowledge(knowledge, PROMPT_INSIGHT_LIMIT),
        );
        Self::with_runtime(config, storage, reasoning, runtime, telemetry)
    }

    pub fn with_runtime(
        config: ConductorConfig,
        storage: Arc<dyn DurableStorage>,
        reasoning: Arc<dyn ReasoningService>,
        runtime: Arc<dyn AgentRuntime>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let agents = AgentRegistry::new(storage.clone());
        let gate = AuthorityGate::new(config.gate.clone(), ApprovalLog::new(storage.clone()));
        let knowledge = KnowledgeRepository::with_half_life(storage.clone(), config.knowledge.half_life_hours);
        let capabilities = Arc::new(CapabilityRegistry::new());

        let coordinator = Arc::new(Coordinator::new(
            config.coordinator_config(),
            agents.clone(),
            gate.clone(),
            knowledge.clone(),
            capabilities.clone(),
            runtime,
            telemetry.clone(),
        ));

        let mut handlers = StepRegistry::with_builtins();
        handlers.register(Arc::new(ReasoningStep::new(reasoning.clone())));
        handlers.register(Arc::new(CoordinationStep::new(coordinator.clone())));
        let engine = WorkflowEngine::new(
            config.engine_config(),
            CheckpointStore::new(storage.clone()),
            handlers,
            telemetry.clone(),
            Some(knowledge.clone()),
        );

        Self {
            config,
            storage,
            agents,
            gate,
            knowledge,
            capabilities,
            coordinator,
            engine,
            reasoning,
            telemetry,
        }
    }

    /// Volatile state with default configuration; reasoning is unconfigured.
    pub fn in_memory() -> Self {
        Self::new(
            ConductorConfig::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(UnconfiguredReasoningService),
            Arc::new(TracingTelemetry),
        )
    }

    /// Build storage, telemetry and reasoning from `config`.
    pub fn from_config(config: ConductorConfig) -> Result<Self, ConductorError> {
        let storage: Arc<dyn DurableStorage> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::Sqlite => Arc::new(SqliteStorage::new(Database::open(&config.storage.path)?)),
        };
        let telemetry: Arc<dyn TelemetrySink> = match config.telemetry.sink {
            TelemetryKind::Tracing => Arc::new(TracingTelemetry),
            TelemetryKind::Jsonl => Arc::new(JsonlTelemetry::new(&config.telemetry.dir)),
            TelemetryKind::None => Arc::new(NoopTelemetry),
        };
        let reasoning: Arc<dyn ReasoningService> = if config.reasoning.is_configured() {
            Arc::new(HttpReasoningService::new(config.reasoning.clone()))
        } else {
            tracing::debug!("[AppState] No reasoning API key configured; reason steps will fail");
            Arc::new(UnconfiguredReasoningService)
        };
        Ok(Self::new(config, storage, reasoning, telemetry))
    }

    // ─── Workflows ────────────────────────────────────────────────────────

    pub async fn start_workflow(&self, workflow_name: &str, input: Value) -> Result<String, ConductorError> {
        self.engine.start_workflow(workflow_name, input).await
    }

    pub async fn cancel_workflow(&self, instance_id: &str) -> Result<(), ConductorError> {
        self.engine.cancel_workflow(instance_id).await
    }

    pub async fn get_workflow_status(&self, instance_id: &str) -> Result<WorkflowInstance, ConductorError> {
        self.engine.get_workflow_status(instance_id).await
    }

    // ─── Coordination ─────────────────────────────────────────────────────

    pub async fn coordinate(
        &self,
        task: CoordinationTask,
        pattern: CoordinationPattern,
        agent_ids: &[String],
    ) -> Result<CoordinationSession, ConductorError> {
        self.coordinator.coordinate(task, pattern, agent_ids).await
    }

    pub async fn resolve_escalation(
        &self,
        session_id: &str,
        resolution: EscalationResolution,
    ) -> Result<CoordinationSession, ConductorError> {
        self.coordinator.resolve_escalation(session_id, resolution).await
    }

    // ─── Agents & Governance ──────────────────────────────────────────────

    pub async fn register_agent(&self, input: RegisterAgentInput) -> Result<AgentDescriptor, ConductorError> {
        self.agents.register(input).await
    }

    pub async fn retire_agent(&self, agent_id: &str) -> Result<AgentDescriptor, ConductorError> {
        self.agents.retire(agent_id).await
    }

    /// Gate `action` for a registered agent at its autonomy level and
    /// record the decision.
    pub async fn evaluate_action(
        &self,
        agent_id: &str,
        action: &ActionDescriptor,
    ) -> Result<ActionApprovalDecision, ConductorError> {
        let agent = self.agents.get_by_id(agent_id).await?;
        if agent.is_retired() {
            return Err(ConductorError::permanent(format!("Agent {} is retired", agent_id)));
        }
        self.gate.check(agent_id, action, agent.autonomy).await
    }

    pub fn set_capability_enabled(&self, capability_id: &str, enabled: bool) -> Result<(), ConductorError> {
        self.capabilities.set_capability_enabled(capability_id, enabled)
    }
}
