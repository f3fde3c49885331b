//! Reasoning/completion boundary and the agent runtime built on it.
//!
//! The content of agent reasoning is opaque to the runtime; this module only
//! defines how prompts go out, how failures are classified, and how a
//! registered agent turns a coordination work unit into text.

mod http;
mod runtime;

pub use http::{classify_status, HttpReasoningService, ReasoningConfig};
pub use runtime::{AgentRuntime, ReasoningAgentRuntime, SubtaskFailurePolicy, WorkUnit};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConductorError;

/// Per-call generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Overrides the service's configured model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl GenerateOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Completion service: prompt in, text out.
///
/// Errors must be classified: `Transient` for anything worth retrying,
/// `Permanent` for requests that will never succeed as sent.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ConductorError>;
}

/// Placeholder service used when no endpoint is configured. Every call
/// fails permanently so misconfiguration surfaces immediately.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredReasoningService;

#[async_trait]
impl ReasoningService for UnconfiguredReasoningService {
    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, ConductorError> {
        Err(ConductorError::permanent(
            "No reasoning service configured (set reasoning.api_key or ANTHROPIC_API_KEY)",
        ))
    }
}
