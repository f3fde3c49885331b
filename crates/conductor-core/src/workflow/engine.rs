//! Durable workflow engine.
//!
//! Each instance runs as its own tokio task and walks the state machine
//!
//! ```text
//! Pending ─► Running ─┬─► AwaitingRetry ─► Running ─► ...
//!                     ├─► Completed
//!                     ├─► Failed
//!                     └─► Cancelled   (from any non-terminal state)
//! ```
//!
//! Exactly one checkpoint is written per step attempt: `Running` for a
//! successful step (`Completed` for the last one), `AwaitingRetry` for a
//! retryable failure, `Failed` once the budget is spent or the error is not
//! retryable. Cancellation is observed at step boundaries and during backoff,
//! never mid-step, and writes one extra `Cancelled` checkpoint.
//!
//! After a crash, [`WorkflowEngine::recover`] resumes every non-terminal
//! instance from its latest checkpoint.
//!
//! A run's in-memory handle is dropped once its terminal checkpoint is
//! written; from then on status queries are answered from the checkpoint
//! store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::schema::{OnFailure, WorkflowDefinition, WorkflowStep};
use super::step::{StepContext, StepHandler, StepRegistry};
use super::template::{resolve_env_vars, resolve_template};
use crate::error::{ConductorError, ErrorKind};
use crate::models::checkpoint::Checkpoint;
use crate::models::insight::LearningInsight;
use crate::models::workflow::{FailureInfo, RetryState, StepResult, WorkflowInstance, WorkflowStatus};
use crate::store::knowledge_store::tokenize;
use crate::store::{CheckpointStore, KnowledgeRepository};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Per-attempt timeout for steps that do not set `timeout_secs`.
    pub step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            step_timeout: Duration::from_secs(300),
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    status: watch::Receiver<WorkflowInstance>,
}

struct EngineInner {
    config: EngineConfig,
    checkpoints: CheckpointStore,
    handlers: StdRwLock<StepRegistry>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    runs: RwLock<HashMap<String, RunHandle>>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Receives one insight per finished run when set.
    knowledge: Option<KnowledgeRepository>,
}

/// Where a launched run starts.
struct Resume {
    step_index: usize,
    retry: Option<RetryState>,
    delay: Option<Duration>,
    step_outputs: HashMap<String, String>,
}

impl Resume {
    fn fresh() -> Self {
        Self {
            step_index: 0,
            retry: None,
            delay: None,
            step_outputs: HashMap::new(),
        }
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        checkpoints: CheckpointStore,
        handlers: StepRegistry,
        telemetry: Arc<dyn TelemetrySink>,
        knowledge: Option<KnowledgeRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                checkpoints,
                handlers: StdRwLock::new(handlers),
                definitions: RwLock::new(HashMap::new()),
                runs: RwLock::new(HashMap::new()),
                telemetry,
                knowledge,
            }),
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.inner.checkpoints
    }

    pub fn register_handler(&self, handler: Arc<dyn StepHandler>) {
        let mut handlers = match self.inner.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.register(handler);
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        let handlers = match self.inner.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(name)
    }

    /// Validate and register a definition under its name. Variables have
    /// `${ENV_VAR}` references expanded once, here.
    pub async fn register_definition(&self, mut definition: WorkflowDefinition) -> Result<(), ConductorError> {
        definition.validate().map_err(ConductorError::Permanent)?;
        for step in &definition.steps {
            if self.handler(&step.handler).is_none() {
                return Err(ConductorError::permanent(format!(
                    "Step '{}' uses unknown handler '{}'",
                    step.name, step.handler
                )));
            }
        }
        for value in definition.variables.values_mut() {
            *value = resolve_env_vars(value);
        }
        tracing::info!(
            "[WorkflowEngine] Registered workflow '{}' v{} ({} steps)",
            definition.name,
            definition.version,
            definition.steps.len()
        );
        self.inner
            .definitions
            .write()
            .await
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn definition(&self, name: &str) -> Result<Arc<WorkflowDefinition>, ConductorError> {
        self.inner
            .definitions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::not_found(format!("Workflow definition '{}'", name)))
    }

    pub async fn start_workflow(&self, workflow_name: &str, input: Value) -> Result<String, ConductorError> {
        self.start_workflow_with_id(&Uuid::new_v4().to_string(), workflow_name, input)
            .await
    }

    pub async fn start_workflow_with_id(
        &self,
        instance_id: &str,
        workflow_name: &str,
        input: Value,
    ) -> Result<String, ConductorError> {
        let definition = self.definition(workflow_name).await?;
        // Held until the run is registered, so concurrent starts of one id
        // see each other.
        let mut runs = self.inner.runs.write().await;
        if runs.contains_key(instance_id) {
            return Err(ConductorError::permanent(format!("Instance {} already exists", instance_id)));
        }
        match self.inner.checkpoints.get_latest(instance_id).await {
            Ok(_) => {
                return Err(ConductorError::permanent(format!(
                    "Instance {} already has checkpoints",
                    instance_id
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let instance = WorkflowInstance::new(
            instance_id.to_string(),
            definition.name.clone(),
            definition.version.clone(),
            input,
        );
        self.launch(&mut runs, instance, definition, Resume::fresh());
        Ok(instance_id.to_string())
    }

    /// Request cancellation; the run stops at its next step boundary or
    /// immediately if it is waiting to retry.
    pub async fn cancel_workflow(&self, instance_id: &str) -> Result<(), ConductorError> {
        if let Some(handle) = self.inner.runs.read().await.get(instance_id) {
            let status = handle.status.borrow().status;
            if status.is_terminal() {
                return Err(ConductorError::permanent(format!(
                    "Instance {} is already {}",
                    instance_id, status
                )));
            }
            handle.cancel.cancel();
            tracing::info!("[WorkflowEngine] Cancellation requested for {}", instance_id);
            return Ok(());
        }

        let latest = self.inner.checkpoints.get_latest(instance_id).await?;
        if latest.status.is_terminal() {
            return Err(ConductorError::permanent(format!(
                "Instance {} is already {}",
                instance_id, latest.status
            )));
        }
        Err(ConductorError::permanent(format!(
            "Instance {} is {} but not running here; call recover first",
            instance_id, latest.status
        )))
    }

    /// Live view for instances run by this engine, otherwise the state
    /// reconstructed from the latest checkpoint.
    pub async fn get_workflow_status(&self, instance_id: &str) -> Result<WorkflowInstance, ConductorError> {
        if let Some(handle) = self.inner.runs.read().await.get(instance_id) {
            let mut instance = handle.status.borrow().clone();
            instance.cancel_requested |= handle.cancel.is_cancelled();
            return Ok(instance);
        }
        let latest = self.inner.checkpoints.get_latest(instance_id).await?;
        instance_from_checkpoint(&latest)
    }

    /// Resolve once the instance reaches a terminal state.
    pub async fn await_terminal(&self, instance_id: &str) -> Result<WorkflowInstance, ConductorError> {
        let receiver = {
            let runs = self.inner.runs.read().await;
            runs.get(instance_id).map(|h| h.status.clone())
        };
        let Some(mut receiver) = receiver else {
            let instance = self.get_workflow_status(instance_id).await?;
            if instance.status.is_terminal() {
                return Ok(instance);
            }
            return Err(ConductorError::permanent(format!(
                "Instance {} is {} but not running here; call recover first",
                instance_id, instance.status
            )));
        };
        let terminal = receiver
            .wait_for(|i| i.status.is_terminal())
            .await
            .map_err(|_| ConductorError::Internal(format!("Run task for {} ended unexpectedly", instance_id)))?;
        Ok(terminal.clone())
    }

    /// Resume every non-terminal instance found in the checkpoint store.
    ///
    /// A `Running` checkpoint resumes at the following step, an
    /// `AwaitingRetry` checkpoint retries its step with the attempt counter
    /// restored. Instances whose definition is not registered are skipped.
    pub async fn recover(&self) -> Result<Vec<String>, ConductorError> {
        let mut resumed = Vec::new();
        for instance_id in self.inner.checkpoints.list_instance_ids().await? {
            let mut runs = self.inner.runs.write().await;
            if runs.contains_key(&instance_id) {
                continue;
            }
            let latest = match self.inner.checkpoints.get_latest(&instance_id).await {
                Ok(cp) => cp,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if latest.status.is_terminal() {
                continue;
            }

            let mut instance = instance_from_checkpoint(&latest)?;
            let definition = match self.definition(&instance.workflow_name).await {
                Ok(def) => def,
                Err(_) => {
                    tracing::warn!(
                        "[WorkflowEngine] Cannot recover {}: workflow '{}' is not registered",
                        instance_id,
                        instance.workflow_name
                    );
                    continue;
                }
            };

            let step_index = latest.resume_step_index();
            if step_index >= definition.steps.len() {
                tracing::warn!(
                    "[WorkflowEngine] Cannot recover {}: resume step {} is past the end of '{}'",
                    instance_id,
                    step_index,
                    definition.name
                );
                continue;
            }

            let (retry, delay) = if latest.status == WorkflowStatus::AwaitingRetry {
                let policy = self
                    .inner
                    .config
                    .retry
                    .with_override(definition.steps[step_index].retry.as_ref());
                let mut state = RetryState::new(step_index, policy.attempts());
                state.attempt = latest.attempt;
                state.last_failure = latest.failure_reason.clone();
                let delay = instance
                    .retry
                    .as_ref()
                    .and_then(|r| r.next_retry_at)
                    .and_then(|at| (at - Utc::now()).to_std().ok());
                (Some(state), delay)
            } else {
                (None, None)
            };

            let step_outputs = instance
                .step_results
                .iter()
                .map(|r| (r.step_name.clone(), output_text(&r.output)))
                .collect();
            instance.status = WorkflowStatus::Pending;
            instance.retry = None;

            tracing::info!(
                "[WorkflowEngine] Recovering {} at step {} (from checkpoint #{} {})",
                instance_id,
                step_index,
                latest.sequence,
                latest.status
            );
            self.launch(
                &mut runs,
                instance,
                definition,
                Resume {
                    step_index,
                    retry,
                    delay,
                    step_outputs,
                },
            );
            resumed.push(instance_id);
        }
        Ok(resumed)
    }

    /// Delete every checkpoint of an instance that is not running here.
    pub async fn purge_instance(&self, instance_id: &str) -> Result<usize, ConductorError> {
        let runs = self.inner.runs.read().await;
        if runs.contains_key(instance_id) {
            return Err(ConductorError::permanent(format!(
                "Instance {} is running; cancel it before purging",
                instance_id
            )));
        }
        let removed = self.inner.checkpoints.purge_instance(instance_id).await?;
        if removed == 0 {
            return Err(ConductorError::not_found(format!("Workflow instance {}", instance_id)));
        }
        tracing::info!("[WorkflowEngine] Purged {} checkpoint(s) of {}", removed, instance_id);
        Ok(removed)
    }

    /// Drop checkpoints older than `age` from every instance not running
    /// here. Each instance keeps its latest checkpoint.
    pub async fn compact_history(&self, age: Duration) -> Result<usize, ConductorError> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let mut removed = 0;
        for instance_id in self.inner.checkpoints.list_instance_ids().await? {
            let runs = self.inner.runs.read().await;
            if runs.contains_key(&instance_id) {
                continue;
            }
            removed += self.inner.checkpoints.purge_older_than(&instance_id, age).await?;
        }
        tracing::info!("[WorkflowEngine] Compacted {} aged checkpoint(s)", removed);
        Ok(removed)
    }

    /// Number of runs this engine is driving.
    pub async fn active_runs(&self) -> usize {
        self.inner.runs.read().await.len()
    }

    /// Register and spawn a run; the caller holds `runs` across its own
    /// existence checks.
    fn launch(
        &self,
        runs: &mut HashMap<String, RunHandle>,
        instance: WorkflowInstance,
        definition: Arc<WorkflowDefinition>,
        resume: Resume,
    ) {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(instance.clone());
        runs.insert(
            instance.id.clone(),
            RunHandle {
                cancel: cancel.clone(),
                status: rx,
            },
        );

        let runner = Runner {
            engine: self.clone(),
            definition,
            cancel,
            tx,
            instance,
            step_outputs: resume.step_outputs.clone(),
        };
        tokio::spawn(runner.run(resume));
    }
}

// ─── Run Loop ─────────────────────────────────────────────────────────────

struct Runner {
    engine: WorkflowEngine,
    definition: Arc<WorkflowDefinition>,
    cancel: CancellationToken,
    tx: watch::Sender<WorkflowInstance>,
    instance: WorkflowInstance,
    step_outputs: HashMap<String, String>,
}

enum AttemptFailure {
    /// Retry budget remains; wait this long first.
    Retry(Duration),
    Final,
}

impl Runner {
    async fn run(mut self, resume: Resume) {
        let steps = self.definition.steps.len();
        let mut step_index = resume.step_index;
        let mut retry = resume.retry;

        self.instance.status = WorkflowStatus::Running;
        self.publish();
        self.emit(
            if step_index == 0 && retry.is_none() {
                "workflow.started"
            } else {
                "workflow.resumed"
            },
            json!({ "stepIndex": step_index }),
        )
        .await;

        if let Some(delay) = resume.delay {
            if !self.backoff(delay).await {
                return self.finish_cancelled(step_index).await;
            }
        }

        while step_index < steps {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(step_index).await;
            }

            let step = self.definition.steps[step_index].clone();
            let policy = self.engine.inner.config.retry.with_override(step.retry.as_ref());
            let mut state = retry
                .take()
                .filter(|r| r.step_index == step_index)
                .unwrap_or_else(|| RetryState::new(step_index, policy.attempts()));
            state.max_attempts = policy.attempts();
            let attempt = state.begin_attempt();

            self.instance.current_step = step_index;
            self.instance.status = WorkflowStatus::Running;
            self.instance.retry = Some(state.clone());
            self.publish();
            tracing::debug!(
                "[WorkflowEngine] {} step {} '{}' attempt {}/{}",
                self.instance.id,
                step_index,
                step.name,
                attempt,
                state.max_attempts
            );

            match self.execute_attempt(&step, step_index, attempt).await {
                Ok(output) => {
                    self.record_step(step_index, &step, attempt, Ok(output.clone()));
                    let status = if step_index + 1 == steps {
                        WorkflowStatus::Completed
                    } else {
                        WorkflowStatus::Running
                    };
                    self.instance.retry = None;
                    if let Err(e) = self.checkpoint(step_index, &step.name, attempt, status, None).await {
                        return self.fail(step_index, &step.name, e).await;
                    }
                    self.emit(
                        "workflow.step.completed",
                        json!({ "stepIndex": step_index, "step": step.name, "attempt": attempt }),
                    )
                    .await;
                    step_index += 1;
                }
                Err(error) => {
                    let failure = if error.is_retryable() && !state.exhausted() {
                        AttemptFailure::Retry(policy.delay_for(attempt - 1))
                    } else {
                        AttemptFailure::Final
                    };
                    match failure {
                        AttemptFailure::Retry(delay) => {
                            state.last_failure = Some(error.to_string());
                            state.next_retry_at = chrono::Duration::from_std(delay)
                                .ok()
                                .map(|d| Utc::now() + d);
                            self.instance.retry = Some(state.clone());
                            self.instance.status = WorkflowStatus::AwaitingRetry;
                            let reason = error.to_string();
                            if let Err(e) = self
                                .checkpoint(step_index, &step.name, attempt, WorkflowStatus::AwaitingRetry, Some(reason))
                                .await
                            {
                                return self.fail(step_index, &step.name, e).await;
                            }
                            self.publish();
                            tracing::info!(
                                "[WorkflowEngine] {} step '{}' attempt {} failed ({}); retrying in {:?}",
                                self.instance.id,
                                step.name,
                                attempt,
                                error,
                                delay
                            );
                            self.emit(
                                "workflow.step.retry_scheduled",
                                json!({
                                    "stepIndex": step_index,
                                    "step": step.name,
                                    "attempt": attempt,
                                    "delayMs": delay.as_millis() as u64,
                                }),
                            )
                            .await;
                            if !self.backoff(delay).await {
                                return self.finish_cancelled(step_index).await;
                            }
                            retry = Some(state);
                        }
                        AttemptFailure::Final if step.on_failure == OnFailure::Continue => {
                            tracing::warn!(
                                "[WorkflowEngine] {} step '{}' failed ({}); continuing",
                                self.instance.id,
                                step.name,
                                error
                            );
                            self.record_step(step_index, &step, attempt, Err(error.to_string()));
                            let status = if step_index + 1 == steps {
                                WorkflowStatus::Completed
                            } else {
                                WorkflowStatus::Running
                            };
                            self.instance.retry = None;
                            if let Err(e) = self
                                .checkpoint(step_index, &step.name, attempt, status, Some(error.to_string()))
                                .await
                            {
                                return self.fail(step_index, &step.name, e).await;
                            }
                            step_index += 1;
                        }
                        AttemptFailure::Final => return self.fail(step_index, &step.name, error).await,
                    }
                }
            }
        }

        self.instance.status = WorkflowStatus::Completed;
        self.instance.retry = None;
        self.publish();
        tracing::info!("[WorkflowEngine] {} completed", self.instance.id);
        self.emit("workflow.completed", json!({ "steps": steps })).await;
        self.record_insight(format!(
            "Workflow '{}' completed {} step(s)",
            self.definition.name, steps
        ))
        .await;
        self.release().await;
    }

    async fn execute_attempt(&self, step: &WorkflowStep, step_index: usize, attempt: u32) -> Result<String, ConductorError> {
        let handler = self.engine.handler(&step.handler).ok_or_else(|| {
            ConductorError::permanent(format!("Unknown step handler '{}'", step.handler))
        })?;
        let input = step
            .input
            .as_deref()
            .map(|t| {
                resolve_template(
                    t,
                    &self.instance.input,
                    &self.definition.variables,
                    &self.step_outputs,
                )
            })
            .unwrap_or_default();
        let ctx = StepContext {
            instance_id: self.instance.id.clone(),
            workflow_name: self.definition.name.clone(),
            step_index,
            attempt,
            input,
            step: step.clone(),
        };

        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.engine.inner.config.step_timeout);
        match tokio::time::timeout(timeout, handler.execute(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ConductorError::transient(format!(
                "Step '{}' timed out after {:?}",
                step.name, timeout
            ))),
        }
    }

    fn record_step(&mut self, step_index: usize, step: &WorkflowStep, attempts: u32, result: Result<String, String>) {
        let (success, output, error) = match result {
            Ok(output) => (true, output, None),
            Err(error) => (false, String::new(), Some(error)),
        };
        self.step_outputs.insert(step.name.clone(), output.clone());
        self.instance.step_results.push(StepResult {
            step_index,
            step_name: step.name.clone(),
            success,
            output: Value::String(output),
            error,
            attempts,
            finished_at: Utc::now(),
        });
    }

    /// Persist one checkpoint; the sequence advances only on success.
    async fn checkpoint(
        &mut self,
        step_index: usize,
        step_name: &str,
        attempt: u32,
        status: WorkflowStatus,
        failure_reason: Option<String>,
    ) -> Result<(), ConductorError> {
        let sequence = self.instance.next_sequence;
        let successful = failure_reason.is_none()
            && matches!(status, WorkflowStatus::Running | WorkflowStatus::Completed);
        let checkpoint = Checkpoint {
            instance_id: self.instance.id.clone(),
            sequence,
            step_index,
            step_name: step_name.to_string(),
            attempt,
            status,
            context: self.context(if successful { Some(sequence) } else { None }),
            failure_reason,
            timestamp: Utc::now(),
        };
        self.engine
            .inner
            .checkpoints
            .save(&self.instance.id, &checkpoint)
            .await?;
        self.instance.next_sequence = sequence + 1;
        if successful {
            self.instance.last_successful_checkpoint = Some(sequence);
        }
        Ok(())
    }

    fn context(&self, successful_sequence: Option<u64>) -> Value {
        json!({
            "workflowName": self.instance.workflow_name,
            "workflowVersion": self.instance.workflow_version,
            "input": self.instance.input,
            "createdAt": self.instance.created_at,
            "stepResults": self.instance.step_results,
            "retry": self.instance.retry,
            "failure": self.instance.failure,
            "lastSuccessfulCheckpoint": successful_sequence.or(self.instance.last_successful_checkpoint),
        })
    }

    /// Sleep for `delay` unless cancelled first; false means cancelled.
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn fail(mut self, step_index: usize, step_name: &str, error: ConductorError) {
        let reason = error.to_string();
        let attempt = self.current_attempt();
        self.instance.status = WorkflowStatus::Failed;
        self.instance.retry = None;
        self.instance.failure = Some(FailureInfo {
            reason: reason.clone(),
            kind: error.kind(),
            step_index,
            step_name: step_name.to_string(),
            last_successful_checkpoint: self.instance.last_successful_checkpoint,
        });

        if error.kind() == ErrorKind::SequenceConflict {
            // Another writer got in; record the failure after its latest checkpoint.
            if let Ok(latest) = self.engine.inner.checkpoints.get_latest(&self.instance.id).await {
                self.instance.next_sequence = latest.sequence + 1;
            }
        }
        let durable = match self
            .checkpoint(step_index, step_name, attempt, WorkflowStatus::Failed, Some(reason.clone()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "[WorkflowEngine] {} failed and its final checkpoint could not be written: {}",
                    self.instance.id,
                    e
                );
                false
            }
        };
        self.publish();
        tracing::warn!(
            "[WorkflowEngine] {} failed at step {} '{}': {}",
            self.instance.id,
            step_index,
            step_name,
            reason
        );
        self.emit(
            "workflow.failed",
            json!({ "stepIndex": step_index, "step": step_name, "reason": reason, "kind": error.kind().as_str() }),
        )
        .await;
        self.record_insight(format!(
            "Workflow '{}' failed at step '{}' ({}): {}",
            self.definition.name,
            step_name,
            error.kind().as_str(),
            reason
        ))
        .await;
        if durable {
            self.release().await;
        }
    }

    async fn finish_cancelled(mut self, step_index: usize) {
        let step_name = self
            .definition
            .steps
            .get(step_index)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.instance.status = WorkflowStatus::Cancelled;
        self.instance.cancel_requested = true;
        let attempt = self.current_attempt();
        self.instance.retry = None;
        let durable = match self
            .checkpoint(step_index, &step_name, attempt, WorkflowStatus::Cancelled, None)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "[WorkflowEngine] {} cancelled but its final checkpoint could not be written: {}",
                    self.instance.id,
                    e
                );
                false
            }
        };
        self.publish();
        tracing::info!("[WorkflowEngine] {} cancelled at step {}", self.instance.id, step_index);
        self.emit("workflow.cancelled", json!({ "stepIndex": step_index })).await;
        self.record_insight(format!(
            "Workflow '{}' cancelled at step {} '{}'",
            self.definition.name, step_index, step_name
        ))
        .await;
        if durable {
            self.release().await;
        }
    }

    /// Best effort: a failed write is logged and otherwise ignored.
    async fn record_insight(&self, content: String) {
        let Some(knowledge) = &self.engine.inner.knowledge else {
            return;
        };
        let steps = self.definition.steps.len().max(1) as f64;
        let succeeded = self.instance.step_results.iter().filter(|r| r.success).count() as f64;
        let mut topics: Vec<String> = tokenize(&self.definition.name).into_iter().collect();
        topics.sort();
        topics.push("workflow".to_string());
        topics.push(self.instance.status.to_string().to_lowercase());

        let insight = LearningInsight::new(
            format!("workflow:{}", self.instance.id),
            topics,
            succeeded / steps,
            content,
        );
        if let Err(e) = knowledge.record(&insight).await {
            tracing::warn!(
                "[WorkflowEngine] Could not record insight for {}: {}",
                self.instance.id,
                e
            );
        }
    }

    /// Drop the run handle; the terminal checkpoint answers from here on.
    async fn release(&self) {
        self.engine.inner.runs.write().await.remove(&self.instance.id);
    }

    fn current_attempt(&self) -> u32 {
        self.instance.retry.as_ref().map(|r| r.attempt).unwrap_or(0)
    }

    fn publish(&mut self) {
        self.instance.cancel_requested |= self.cancel.is_cancelled();
        self.instance.touch();
        self.tx.send_replace(self.instance.clone());
    }

    async fn emit(&self, event: &str, mut attributes: Value) {
        if let Value::Object(map) = &mut attributes {
            map.insert("instanceId".to_string(), Value::String(self.instance.id.clone()));
            map.insert("workflow".to_string(), Value::String(self.instance.workflow_name.clone()));
        }
        self.engine.inner.telemetry.emit(event, attributes).await;
    }
}

// ─── Checkpoint Decoding ──────────────────────────────────────────────────

fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rebuild the instance view recorded in a checkpoint.
pub fn instance_from_checkpoint(checkpoint: &Checkpoint) -> Result<WorkflowInstance, ConductorError> {
    let ctx = &checkpoint.context;
    let workflow_name = ctx
        .get("workflowName")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ConductorError::permanent(format!(
                "Checkpoint #{} of {} has no workflow name",
                checkpoint.sequence, checkpoint.instance_id
            ))
        })?;
    let workflow_version = ctx
        .get("workflowVersion")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let input = ctx.get("input").cloned().unwrap_or(Value::Null);

    let mut instance = WorkflowInstance::new(
        checkpoint.instance_id.clone(),
        workflow_name.to_string(),
        workflow_version.to_string(),
        input,
    );
    if let Some(results) = ctx.get("stepResults") {
        instance.step_results = serde_json::from_value(results.clone())?;
    }
    if let Some(retry) = ctx.get("retry").filter(|v| !v.is_null()) {
        instance.retry = Some(serde_json::from_value(retry.clone())?);
    }
    if let Some(failure) = ctx.get("failure").filter(|v| !v.is_null()) {
        instance.failure = Some(serde_json::from_value(failure.clone())?);
    }
    if let Some(created) = ctx
        .get("createdAt")
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
    {
        instance.created_at = created;
    }
    instance.last_successful_checkpoint = ctx.get("lastSuccessfulCheckpoint").and_then(|v| v.as_u64());
    instance.current_step = checkpoint.step_index;
    instance.status = checkpoint.status;
    instance.cancel_requested = checkpoint.status == WorkflowStatus::Cancelled;
    instance.next_sequence = checkpoint.sequence + 1;
    instance.updated_at = checkpoint.timestamp;
    Ok(instance)
}
