//! Runtime configuration, loaded from YAML.
//!
//! ```yaml
//! retry:
//!   max_attempts: 5
//!   base_delay_ms: 500
//! engine:
//!   step_timeout_secs: 120
//!   checkpoint_retention_hours: 72
//! coordination:
//!   agent_timeout_secs: 60
//!   swarm_max_rounds: 4
//! gate:
//!   allowlist: ["open_ticket"]
//!   budgetLimit: 100.0
//! knowledge:
//!   half_life_hours: 72
//! storage:
//!   backend: sqlite
//!   path: conductor.db
//! telemetry:
//!   sink: jsonl
//!   dir: .conductor/telemetry
//! reasoning:
//!   api_key: "${ANTHROPIC_API_KEY}"
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConductorError;
use crate::gate::PolicyContext;
use crate::orchestration::CoordinatorConfig;
use crate::reasoning::ReasoningConfig;
use crate::store::knowledge_store::DEFAULT_HALF_LIFE_HOURS;
use crate::workflow::template::resolve_env_vars;
use crate::workflow::{EngineConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
    #[serde(default)]
    pub gate: PolicyContext,
    #[serde(default)]
    pub knowledge: KnowledgeSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Checkpoints older than this are compacted away by `workflow purge`;
    /// the latest checkpoint of an instance is always kept.
    #[serde(default = "default_retention")]
    pub checkpoint_retention_hours: u64,
}

fn default_step_timeout() -> u64 {
    300
}

fn default_retention() -> u64 {
    24 * 7
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            checkpoint_retention_hours: default_retention(),
        }
    }
}

impl EngineSection {
    pub fn checkpoint_retention(&self) -> Duration {
        Duration::from_secs(self.checkpoint_retention_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationSection {
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_swarm_rounds")]
    pub swarm_max_rounds: u32,
    #[serde(default = "default_subtask_attempts")]
    pub hierarchical_max_subtask_attempts: u32,
    #[serde(default = "default_retained_sessions")]
    pub retained_sessions: usize,
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_swarm_rounds() -> u32 {
    5
}

fn default_subtask_attempts() -> u32 {
    3
}

fn default_retained_sessions() -> usize {
    1000
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout(),
            swarm_max_rounds: default_swarm_rounds(),
            hierarchical_max_subtask_attempts: default_subtask_attempts(),
            retained_sessions: default_retained_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSection {
    /// Age at which an insight's recency factor halves.
    #[serde(default = "default_half_life")]
    pub half_life_hours: f64,
}

fn default_half_life() -> f64 {
    DEFAULT_HALF_LIFE_HOURS
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            half_life_hours: default_half_life(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "conductor.db".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    #[default]
    Tracing,
    Jsonl,
    None,
}

impl TelemetryKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tracing" => Some(Self::Tracing),
            "jsonl" => Some(Self::Jsonl),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default)]
    pub sink: TelemetryKind,
    /// Output directory for the `jsonl` sink.
    #[serde(default = "default_telemetry_dir")]
    pub dir: String,
}

fn default_telemetry_dir() -> String {
    ".conductor/telemetry".to_string()
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            sink: TelemetryKind::default(),
            dir: default_telemetry_dir(),
        }
    }
}

impl ConductorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConductorError> {
        let mut config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ConductorError::permanent(format!("Failed to parse config YAML: {}", e)))?;
        config.resolve_secrets();
        Ok(config)
    }

    /// Load a configuration file. The caller applies env overrides.
    pub fn load(path: &str) -> Result<Self, ConductorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConductorError::permanent(format!("Failed to read config file '{}': {}", path, e)))?;
        let config = Self::from_yaml(&content)?;
        tracing::info!("[Config] Loaded configuration from {}", path);
        Ok(config)
    }

    fn resolve_secrets(&mut self) {
        self.reasoning.api_key = resolve_env_vars(&self.reasoning.api_key);
        self.reasoning.base_url = resolve_env_vars(&self.reasoning.base_url);
    }

    /// Apply `CONDUCTOR_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CONDUCTOR_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = path;
        }
        if let Some(raw) = lookup("CONDUCTOR_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.retry.max_attempts = n,
                _ => tracing::warn!("[Config] Ignoring invalid CONDUCTOR_MAX_ATTEMPTS '{}'", raw),
            }
        }
        if let Some(raw) = lookup("CONDUCTOR_TELEMETRY") {
            match TelemetryKind::from_str(&raw) {
                Some(kind) => self.telemetry.sink = kind,
                None => tracing::warn!("[Config] Ignoring unknown CONDUCTOR_TELEMETRY '{}'", raw),
            }
        }
        if self.reasoning.api_key.trim().is_empty() {
            if let Some(key) = lookup("ANTHROPIC_API_KEY") {
                self.reasoning.api_key = key;
            }
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: self.retry.clone(),
            step_timeout: Duration::from_secs(self.engine.step_timeout_secs.max(1)),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            agent_timeout: Duration::from_secs(self.coordination.agent_timeout_secs.max(1)),
            swarm_max_rounds: self.coordination.swarm_max_rounds.max(1),
            hierarchical_max_subtask_attempts: self.coordination.hierarchical_max_subtask_attempts.max(1),
            retained_sessions: self.coordination.retained_sessions,
        }
    }
}
