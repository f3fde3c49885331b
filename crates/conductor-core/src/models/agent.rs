use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentLifecycle {
    Active,
    Deprecated,
    Retired,
}

impl AgentLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
            Self::Retired => "RETIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "DEPRECATED" => Some(Self::Deprecated),
            "RETIRED" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// How much independent action an agent may take without human confirmation.
///
/// Variants are ordered by authority: `RecommendOnly < ActWithConfirmation <
/// FullyAutonomous`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutonomyLevel {
    RecommendOnly,
    ActWithConfirmation,
    FullyAutonomous,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecommendOnly => "RECOMMEND_ONLY",
            Self::ActWithConfirmation => "ACT_WITH_CONFIRMATION",
            Self::FullyAutonomous => "FULLY_AUTONOMOUS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "RECOMMEND_ONLY" => Some(Self::RecommendOnly),
            "ACT_WITH_CONFIRMATION" => Some(Self::ActWithConfirmation),
            "FULLY_AUTONOMOUS" => Some(Self::FullyAutonomous),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: String,
    pub agent_type: String,
    pub description: String,
    pub status: AgentLifecycle,
    pub version: String,
    pub autonomy: AutonomyLevel,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Position in registration order; used to break authority ties.
    pub registration_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentDescriptor {
    pub fn is_retired(&self) -> bool {
        self.status == AgentLifecycle::Retired
    }
}

/// Input for registering a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentInput {
    /// Explicit id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub agent_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub autonomy: AutonomyLevel,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl RegisterAgentInput {
    pub fn new(agent_type: impl Into<String>, autonomy: AutonomyLevel) -> Self {
        Self {
            id: None,
            agent_type: agent_type.into(),
            description: String::new(),
            version: default_version(),
            autonomy,
            capabilities: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update for capability / authority changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentInput {
    pub description: Option<String>,
    pub version: Option<String>,
    pub autonomy: Option<AutonomyLevel>,
    pub capabilities: Option<Vec<String>>,
}
