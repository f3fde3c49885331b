//! Step handlers: the pluggable units of work a workflow step dispatches to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::schema::WorkflowStep;
use crate::error::ConductorError;
use crate::models::coordination::{AgentOutcomeStatus, CoordinationTask, SessionStatus};
use crate::orchestration::Coordinator;
use crate::reasoning::{GenerateOptions, ReasoningService};

/// Everything a handler sees for one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: String,
    pub workflow_name: String,
    pub step_index: usize,
    pub attempt: u32,
    /// Input template with all references resolved.
    pub input: String,
    pub step: WorkflowStep,
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Run one attempt. Transient errors are retried by the engine.
    async fn execute(&self, ctx: &StepContext) -> Result<String, ConductorError>;
}

#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `echo` handler only.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoStep));
        registry
    }

    /// Register a handler under its name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Returns its resolved input unchanged.
pub struct EchoStep;

#[async_trait]
impl StepHandler for EchoStep {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<String, ConductorError> {
        Ok(ctx.input.clone())
    }
}

/// Sends the resolved input to the reasoning service.
pub struct ReasoningStep {
    service: Arc<dyn ReasoningService>,
}

impl ReasoningStep {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StepHandler for ReasoningStep {
    fn name(&self) -> &str {
        "reason"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<String, ConductorError> {
        if ctx.input.trim().is_empty() {
            return Err(ConductorError::permanent(format!("Step '{}' has an empty prompt", ctx.step.name)));
        }
        let mut options = GenerateOptions::default();
        options.system_prompt = ctx.step.system_prompt.clone();
        self.service.generate(&ctx.input, &options).await
    }
}

/// Runs a coordination session and returns its aggregated summary.
pub struct CoordinationStep {
    coordinator: Arc<Coordinator>,
}

impl CoordinationStep {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl StepHandler for CoordinationStep {
    fn name(&self) -> &str {
        "coordinate"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<String, ConductorError> {
        let config = ctx.step.coordinate.as_ref().ok_or_else(|| {
            ConductorError::permanent(format!("Step '{}' has no coordinate block", ctx.step.name))
        })?;
        let task = CoordinationTask::new(ctx.input.clone(), config.action.clone());
        let session = self
            .coordinator
            .coordinate(task, config.pattern, &config.agents)
            .await?;

        match session.status {
            SessionStatus::Completed => Ok(session
                .aggregated
                .as_ref()
                .map(|a| a.summary())
                .unwrap_or_default()),
            SessionStatus::Suspended => Err(ConductorError::permanent(format!(
                "Coordination session {} is suspended awaiting escalation review",
                session.id
            ))),
            _ => {
                let reason = session
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "coordination failed".to_string());
                let all_denied = !session.outcomes.is_empty()
                    && session
                        .outcomes
                        .iter()
                        .all(|o| o.status == AgentOutcomeStatus::Denied);
                let msg = format!("Coordination session {} failed: {}", session.id, reason);
                if all_denied {
                    Err(ConductorError::permanent(msg))
                } else {
                    Err(ConductorError::transient(msg))
                }
            }
        }
    }
}
