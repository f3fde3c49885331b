use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{GenerateOptions, ReasoningService};
use crate::error::ConductorError;
use crate::models::agent::AgentDescriptor;
use crate::models::coordination::{AgentOutcome, AgentOutcomeStatus, CoordinationTask};
use crate::store::KnowledgeRepository;

/// What a single agent is asked to do in one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkUnit {
    pub session_id: String,
    pub task: CoordinationTask,
    /// Hierarchical sub-task text; `None` means the whole task.
    #[serde(default)]
    pub subtask: Option<String>,
    /// Swarm round, starting at 1.
    #[serde(default)]
    pub round: Option<u32>,
    /// Partial results shared by the other participants (swarm).
    #[serde(default)]
    pub shared_context: Vec<String>,
}

impl WorkUnit {
    pub fn whole_task(session_id: &str, task: &CoordinationTask) -> Self {
        Self {
            session_id: session_id.to_string(),
            task: task.clone(),
            subtask: None,
            round: None,
            shared_context: Vec::new(),
        }
    }

    pub fn instruction(&self) -> &str {
        self.subtask.as_deref().unwrap_or(&self.task.description)
    }
}

/// How a hierarchical delegate wants a failed sub-task handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskFailurePolicy {
    /// Same worker again.
    Retry,
    /// Next available worker.
    Reassign,
    FailSession,
}

/// The agent side of a coordination session.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn perform(&self, agent: &AgentDescriptor, unit: &WorkUnit) -> Result<String, ConductorError>;

    /// Split the task into at most `max_subtasks` sub-tasks.
    async fn decompose(
        &self,
        delegate: &AgentDescriptor,
        task: &CoordinationTask,
        max_subtasks: usize,
    ) -> Result<Vec<String>, ConductorError>;

    async fn synthesize(
        &self,
        delegate: &AgentDescriptor,
        task: &CoordinationTask,
        results: &[AgentOutcome],
    ) -> Result<String, ConductorError>;

    async fn on_subtask_failure(
        &self,
        _delegate: &AgentDescriptor,
        _subtask: &str,
        failure: &AgentOutcome,
    ) -> SubtaskFailurePolicy {
        match failure.status {
            AgentOutcomeStatus::TimedOut => SubtaskFailurePolicy::Reassign,
            _ => SubtaskFailurePolicy::Retry,
        }
    }
}

/// Runtime that turns every agent call into a completion request.
pub struct ReasoningAgentRuntime {
    service: Arc<dyn ReasoningService>,
    knowledge: Option<KnowledgeRepository>,
    knowledge_limit: usize,
}

impl ReasoningAgentRuntime {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self {
            service,
            knowledge: None,
            knowledge_limit: 3,
        }
    }

    /// Prepend the most relevant prior insights to every prompt.
    pub fn with_knowledge(mut self, knowledge: KnowledgeRepository, limit: usize) -> Self {
        self.knowledge = Some(knowledge);
        self.knowledge_limit = limit;
        self
    }

    fn system_prompt(agent: &AgentDescriptor) -> String {
        let mut prompt = format!("You are agent '{}' of type {}.", agent.id, agent.agent_type);
        if !agent.description.is_empty() {
            prompt.push(' ');
            prompt.push_str(&agent.description);
        }
        if !agent.capabilities.is_empty() {
            prompt.push_str(&format!(" Capabilities: {}.", agent.capabilities.join(", ")));
        }
        prompt
    }

    async fn prior_experience(&self, topic: &str) -> Vec<String> {
        let Some(knowledge) = &self.knowledge else {
            return Vec::new();
        };
        match knowledge.query(topic, self.knowledge_limit).await {
            Ok(insights) => insights.into_iter().map(|i| i.content).collect(),
            Err(e) => {
                tracing::warn!("[AgentRuntime] Knowledge lookup failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").expect("list marker regex is valid"))
}

/// Parse a numbered or bulleted list into items.
pub(crate) fn parse_list(text: &str) -> Vec<String> {
    let marker = list_marker();
    text.lines()
        .filter(|line| marker.is_match(line))
        .map(|line| marker.replace(line, "").trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[async_trait]
impl AgentRuntime for ReasoningAgentRuntime {
    async fn perform(&self, agent: &AgentDescriptor, unit: &WorkUnit) -> Result<String, ConductorError> {
        let mut prompt = String::new();
        let experience = self.prior_experience(&unit.task.description).await;
        if !experience.is_empty() {
            prompt.push_str("Relevant prior experience:\n");
            for item in &experience {
                prompt.push_str(&format!("- {}\n", item));
            }
            prompt.push('\n');
        }
        if unit.subtask.is_some() {
            prompt.push_str(&format!("Overall task: {}\n\n", unit.task.description));
        }
        if let Some(round) = unit.round {
            prompt.push_str(&format!("Collaboration round {}.\n", round));
            if !unit.shared_context.is_empty() {
                prompt.push_str("Other participants contributed:\n");
                for item in &unit.shared_context {
                    prompt.push_str(&format!("- {}\n", item));
                }
            }
            prompt.push('\n');
        }
        prompt.push_str(unit.instruction());

        let options = GenerateOptions::default().with_system_prompt(Self::system_prompt(agent));
        self.service.generate(&prompt, &options).await
    }

    async fn decompose(
        &self,
        delegate: &AgentDescriptor,
        task: &CoordinationTask,
        max_subtasks: usize,
    ) -> Result<Vec<String>, ConductorError> {
        let prompt = format!(
            "Break the following task into at most {} independent sub-tasks. \
             Reply with a numbered list, one sub-task per line.\n\nTask: {}",
            max_subtasks, task.description
        );
        let options = GenerateOptions::default().with_system_prompt(Self::system_prompt(delegate));
        let reply = self.service.generate(&prompt, &options).await?;

        let mut subtasks = parse_list(&reply);
        subtasks.truncate(max_subtasks.max(1));
        if subtasks.is_empty() {
            subtasks.push(task.description.clone());
        }
        Ok(subtasks)
    }

    async fn synthesize(
        &self,
        delegate: &AgentDescriptor,
        task: &CoordinationTask,
        results: &[AgentOutcome],
    ) -> Result<String, ConductorError> {
        let mut prompt = format!(
            "Combine the sub-task results below into a single answer for the task.\n\nTask: {}\n\n",
            task.description
        );
        for result in results {
            let body = result.output.as_deref().or(result.error.as_deref()).unwrap_or("");
            prompt.push_str(&format!(
                "[{} / {}] {}\n",
                result.agent_id,
                result.status.as_str(),
                body
            ));
        }
        let options = GenerateOptions::default().with_system_prompt(Self::system_prompt(delegate));
        self.service.generate(&prompt, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::AutonomyLevel;
    use crate::models::approval::ActionDescriptor;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Recorder {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReasoningService for Recorder {
        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, ConductorError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn agent() -> AgentDescriptor {
        AgentDescriptor {
            id: "planner".into(),
            agent_type: "planner".into(),
            description: String::new(),
            status: crate::models::agent::AgentLifecycle::Active,
            version: "1.0.0".into(),
            autonomy: AutonomyLevel::FullyAutonomous,
            capabilities: vec![],
            registration_seq: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_list() {
        let items = parse_list("Plan:\n1. gather data\n2) analyze\n- report\n\nnot an item");
        assert_eq!(items, vec!["gather data", "analyze", "report"]);
    }

    #[tokio::test]
    async fn test_decompose_falls_back_to_whole_task() {
        let service = Arc::new(Recorder {
            reply: "I cannot split this.".into(),
            prompts: Mutex::new(vec![]),
        });
        let runtime = ReasoningAgentRuntime::new(service);
        let task = CoordinationTask::new("write a haiku", ActionDescriptor::read_only("write"));
        let subtasks = runtime.decompose(&agent(), &task, 3).await.unwrap();
        assert_eq!(subtasks, vec!["write a haiku"]);
    }

    #[tokio::test]
    async fn test_swarm_prompt_includes_shared_context() {
        let service = Arc::new(Recorder {
            reply: "ok".into(),
            prompts: Mutex::new(vec![]),
        });
        let runtime = ReasoningAgentRuntime::new(service.clone());
        let task = CoordinationTask::new("name the project", ActionDescriptor::read_only("brainstorm"));
        let mut unit = WorkUnit::whole_task("s1", &task);
        unit.round = Some(2);
        unit.shared_context = vec!["conductor".into()];

        runtime.perform(&agent(), &unit).await.unwrap();
        let prompt = service.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("round 2"));
        assert!(prompt.contains("- conductor"));
        assert!(prompt.ends_with("name the project"));
    }
}
