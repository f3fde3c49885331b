use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::ActionDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinationPattern {
    Parallel,
    Hierarchical,
    Competitive,
    CollaborativeSwarm,
}

impl CoordinationPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "PARALLEL",
            Self::Hierarchical => "HIERARCHICAL",
            Self::Competitive => "COMPETITIVE",
            Self::CollaborativeSwarm => "COLLABORATIVE_SWARM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PARALLEL" => Some(Self::Parallel),
            "HIERARCHICAL" => Some(Self::Hierarchical),
            "COMPETITIVE" => Some(Self::Competitive),
            "COLLABORATIVE_SWARM" | "SWARM" => Some(Self::CollaborativeSwarm),
            _ => None,
        }
    }
}

/// The unit of work handed to a coordination session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationTask {
    pub id: String,
    pub description: String,
    /// What each participating agent is asking to do; checked by the gate.
    pub action: ActionDescriptor,
}

impl CoordinationTask {
    pub fn new(description: impl Into<String>, action: ActionDescriptor) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    /// Parked on an escalated gate decision.
    Suspended,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentOutcomeStatus {
    Succeeded,
    Failed,
    TimedOut,
    Denied,
    Cancelled,
}

impl AgentOutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Denied => "DENIED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// One agent's contribution to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub agent_id: String,
    pub status: AgentOutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sub-task index for hierarchical sessions, round for swarms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<usize>,
    pub duration_ms: u64,
}

impl AgentOutcome {
    pub fn succeeded(agent_id: &str, output: String, duration_ms: u64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: AgentOutcomeStatus::Succeeded,
            output: Some(output),
            error: None,
            unit: None,
            duration_ms,
        }
    }

    pub fn unsuccessful(
        agent_id: &str,
        status: AgentOutcomeStatus,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status,
            output: None,
            error: Some(error.into()),
            unit: None,
            duration_ms,
        }
    }

    pub fn with_unit(mut self, unit: usize) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentOutcomeStatus::Succeeded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AggregatedOutcome {
    /// Parallel: every individual result, tagged.
    Merged { results: Vec<AgentOutcome> },
    /// Competitive: the first valid result.
    Winner { agent_id: String, output: String },
    /// Hierarchical: the delegate's synthesis of sub-results.
    Synthesized { delegate_id: String, output: String },
    /// CollaborativeSwarm: the converged or final-round merged result.
    Converged {
        output: String,
        rounds: u32,
        converged: bool,
    },
}

impl AggregatedOutcome {
    /// A single textual rendering, used for workflow step output and insights.
    pub fn summary(&self) -> String {
        match self {
            Self::Merged { results } => results
                .iter()
                .map(|r| match (&r.output, &r.error) {
                    (Some(out), _) => format!("[{}:{}] {}", r.agent_id, r.status.as_str(), out),
                    (None, Some(err)) => format!("[{}:{}] {}", r.agent_id, r.status.as_str(), err),
                    (None, None) => format!("[{}:{}]", r.agent_id, r.status.as_str()),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Winner { output, .. } => output.clone(),
            Self::Synthesized { output, .. } => output.clone(),
            Self::Converged { output, .. } => output.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingEscalation {
    pub agent_id: String,
    pub decision_id: String,
    pub reason: String,
}

/// External decision on a parked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationResolution {
    pub approved: bool,
    pub reviewer: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationSession {
    pub id: String,
    pub task: CoordinationTask,
    pub pattern: CoordinationPattern,
    pub participants: Vec<String>,
    pub outcomes: Vec<AgentOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<AggregatedOutcome>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_escalations: Vec<PendingEscalation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinationSession {
    pub fn new(task: CoordinationTask, pattern: CoordinationPattern, participants: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            pattern,
            participants,
            outcomes: Vec::new(),
            aggregated: None,
            status: SessionStatus::Running,
            failure_reason: None,
            pending_escalations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Outcome recorded for `agent_id`, last one wins for multi-unit patterns.
    pub fn outcome_for(&self, agent_id: &str) -> Option<&AgentOutcome> {
        self.outcomes.iter().rev().find(|o| o.agent_id == agent_id)
    }
}
