//! YAML schema types for workflow definitions.
//!
//! A workflow YAML defines an ordered, durable step pipeline:
//!
//! ```yaml
//! name: "incident-triage"
//! description: "Collect signals, analyze, propose remediation"
//! version: "1.0"
//!
//! variables:
//!   service: "checkout"
//!
//! steps:
//!   - name: "collect"
//!     handler: echo
//!     input: "Alerts for ${variables.service}: ${input}"
//!
//!   - name: "analyze"
//!     handler: reason
//!     system_prompt: "You are an SRE."
//!     input: "${steps.collect.output}"
//!     retry:
//!       max_attempts: 5
//!     timeout_secs: 120
//!
//!   - name: "remediate"
//!     handler: coordinate
//!     input: "Propose a fix for: ${steps.analyze.output}"
//!     on_failure: continue
//!     coordinate:
//!       pattern: COMPETITIVE
//!       agents: ["sre-bot", "db-bot"]
//!       action:
//!         actionType: propose_fix
//! ```

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::approval::ActionDescriptor;
use crate::models::coordination::CoordinationPattern;

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name; also the key workflows are started by
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    /// Values for `${variables.<key>}`; `${ENV_VAR}` references are expanded
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Ordered list of workflow steps
    pub steps: Vec<WorkflowStep>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// What to do when a step fails for good (retry budget spent or a
/// non-retryable error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Fail the workflow (default)
    #[default]
    Stop,
    /// Record the failed step and continue with the next one
    Continue,
}

/// Per-step retry override; unset fields inherit the engine policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter: Option<f64>,
}

/// Parameters of a `coordinate` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateConfig {
    pub pattern: CoordinationPattern,
    /// Candidate agent ids
    pub agents: Vec<String>,
    /// The action every participant asks the gate for
    #[serde(default = "default_coordinate_action")]
    pub action: ActionDescriptor,
}

fn default_coordinate_action() -> ActionDescriptor {
    ActionDescriptor::read_only("coordinate")
}

/// A single step in the workflow pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name (unique within the workflow, used for output references)
    pub name: String,

    /// Registered step handler: `echo`, `reason`, `coordinate`, or custom
    #[serde(default = "default_handler")]
    pub handler: String,

    /// Input template:
    ///  - `${input}` the workflow input
    ///  - `${steps.<StepName>.output}` output from a previous step
    ///  - `${variables.<key>}` from the variables block
    #[serde(default)]
    pub input: Option<String>,

    /// System prompt for `reason` steps
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub retry: Option<RetryOverride>,

    /// Per-attempt timeout; falls back to the engine default
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub on_failure: OnFailure,

    /// Required for `coordinate` steps
    #[serde(default)]
    pub coordinate: Option<CoordinateConfig>,
}

fn default_handler() -> String {
    "echo".to_string()
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            input: None,
            system_prompt: None,
            retry: None,
            timeout_secs: None,
            on_failure: OnFailure::Stop,
            coordinate: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse workflow YAML: {}", e))
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read workflow file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// Structural checks that do not depend on registered handlers.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Workflow name must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("Workflow '{}' has no steps", self.name));
        }

        let step_ref = Regex::new(r"\$\{steps\.([^.}]+)\.output\}").map_err(|e| e.to_string())?;
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(format!("Step {} has an empty name", i + 1));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(format!("Duplicate step name '{}'", step.name));
            }
            if step.handler == "coordinate" && step.coordinate.is_none() {
                return Err(format!("Step '{}' uses the coordinate handler without a coordinate block", step.name));
            }
            if let Some(retry) = &step.retry {
                if retry.max_attempts == Some(0) {
                    return Err(format!("Step '{}' sets retry.max_attempts to 0", step.name));
                }
            }
            if let Some(input) = &step.input {
                for caps in step_ref.captures_iter(input) {
                    let referenced = &caps[1];
                    if !seen.contains(referenced) || referenced == step.name {
                        return Err(format!(
                            "Step '{}' references output of '{}', which does not run before it",
                            step.name, referenced
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
name: "Test Flow"
steps:
  - name: "Step 1"
    input: "Hello, world!"
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.name, "Test Flow");
        assert_eq!(wf.version, "1.0");
        assert_eq!(wf.steps.len(), 1);
        assert_eq!(wf.steps[0].handler, "echo");
        assert_eq!(wf.steps[0].on_failure, OnFailure::Stop);
        wf.validate().unwrap();
    }

    #[test]
    fn test_parse_full_workflow() {
        let yaml = r#"
name: "incident-triage"
version: "2.0"
variables:
  service: "checkout"
steps:
  - name: "collect"
    input: "Alerts for ${variables.service}"
  - name: "analyze"
    handler: reason
    system_prompt: "You are an SRE."
    input: "${steps.collect.output}"
    retry:
      max_attempts: 5
      base_delay_ms: 10
    timeout_secs: 30
  - name: "remediate"
    handler: coordinate
    on_failure: continue
    input: "Fix: ${steps.analyze.output}"
    coordinate:
      pattern: COMPETITIVE
      agents: ["sre-bot", "db-bot"]
      action:
        actionType: propose_fix
        stateMutating: true
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.version, "2.0");
        assert_eq!(wf.steps[1].retry.as_ref().unwrap().max_attempts, Some(5));
        assert_eq!(wf.steps[1].timeout_secs, Some(30));
        assert_eq!(wf.steps[2].on_failure, OnFailure::Continue);
        let coord = wf.steps[2].coordinate.as_ref().unwrap();
        assert_eq!(coord.pattern, CoordinationPattern::Competitive);
        assert_eq!(coord.agents.len(), 2);
        assert!(coord.action.state_mutating);
        wf.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let forward_ref = WorkflowDefinition {
            name: "wf".into(),
            description: None,
            version: "1".into(),
            variables: HashMap::new(),
            steps: vec![
                WorkflowStep::new("a", "echo").with_input("${steps.b.output}"),
                WorkflowStep::new("b", "echo"),
            ],
        };
        assert!(forward_ref.validate().unwrap_err().contains("'b'"));

        let mut duplicate = forward_ref.clone();
        duplicate.steps = vec![WorkflowStep::new("a", "echo"), WorkflowStep::new("a", "echo")];
        assert!(duplicate.validate().unwrap_err().contains("Duplicate"));

        let mut no_block = forward_ref.clone();
        no_block.steps = vec![WorkflowStep::new("c", "coordinate")];
        assert!(no_block.validate().is_err());

        let mut empty = forward_ref;
        empty.steps.clear();
        assert!(empty.validate().is_err());
    }
}
