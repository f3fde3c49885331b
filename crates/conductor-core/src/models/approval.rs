use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AutonomyLevel;

/// A proposed agent action, as seen by the authority gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    /// Whether the action changes state outside the agent.
    #[serde(default)]
    pub state_mutating: bool,
    #[serde(default)]
    pub irreversible: bool,
    #[serde(default)]
    pub externally_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl ActionDescriptor {
    /// A read-only action such as analysis or recommendation.
    pub fn read_only(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            description: String::new(),
            state_mutating: false,
            irreversible: false,
            externally_visible: false,
            estimated_cost: None,
        }
    }

    pub fn mutating(action_type: impl Into<String>) -> Self {
        Self {
            state_mutating: true,
            ..Self::read_only(action_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.state_mutating = true;
        self.irreversible = true;
        self
    }

    pub fn externally_visible(mut self) -> Self {
        self.externally_visible = true;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    Escalate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
            Self::Escalate => "ESCALATE",
        }
    }
}

/// Immutable audit record of one gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionApprovalDecision {
    pub id: String,
    pub action: ActionDescriptor,
    pub agent_id: String,
    pub autonomy: AutonomyLevel,
    pub decision: Decision,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ActionApprovalDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}
