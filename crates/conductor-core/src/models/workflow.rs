use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    AwaitingRetry,
    Cancelled,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::AwaitingRetry => "AWAITING_RETRY",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "AWAITING_RETRY" => Some(Self::AwaitingRetry),
            "CANCELLED" => Some(Self::Cancelled),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// No further transitions are possible from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step once it stops being retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_index: usize,
    pub step_name: String,
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

/// Attempt bookkeeping for the step currently being executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub step_index: usize,
    /// Attempts made so far; never exceeds `max_attempts`.
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new(step_index: usize, max_attempts: u32) -> Self {
        Self {
            step_index,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_failure: None,
            next_retry_at: None,
        }
    }

    /// Count the start of a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = (self.attempt + 1).min(self.max_attempts);
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Why an instance stopped, and how far it got.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub reason: String,
    pub kind: ErrorKind,
    pub step_index: usize,
    pub step_name: String,
    /// Sequence number of the last checkpoint recording a successful step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_checkpoint: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_name: String,
    pub workflow_version: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub step_results: Vec<StepResult>,
    pub current_step: usize,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryState>,
    pub cancel_requested: bool,
    /// Sequence number the next checkpoint must carry.
    pub next_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_checkpoint: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        id: String,
        workflow_name: String,
        workflow_version: String,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow_name,
            workflow_version,
            input,
            step_results: Vec::new(),
            current_step: 0,
            status: WorkflowStatus::Pending,
            retry: None,
            cancel_requested: false,
            next_sequence: 1,
            last_successful_checkpoint: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_state_never_exceeds_max() {
        let mut retry = RetryState::new(0, 2);
        assert_eq!(retry.begin_attempt(), 1);
        assert!(!retry.exhausted());
        assert_eq!(retry.begin_attempt(), 2);
        assert!(retry.exhausted());
        assert_eq!(retry.begin_attempt(), 2);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::AwaitingRetry,
            WorkflowStatus::Cancelled,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
        ] {
            assert_eq!(WorkflowStatus::from_str(status.as_str()), Some(status));
        }
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::AwaitingRetry.is_terminal());
    }
}
