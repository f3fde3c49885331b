use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::WorkflowStatus;

/// Immutable snapshot of workflow progress.
///
/// For a given instance, sequence numbers start at 1 and increase by one per
/// checkpoint; the highest sequence is the authoritative resume point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub instance_id: String,
    pub sequence: u64,
    /// Index of the step this checkpoint records.
    pub step_index: usize,
    pub step_name: String,
    /// Attempt number of the recorded step (1-based).
    pub attempt: u32,
    pub status: WorkflowStatus,
    /// Serialized step output and instance context.
    pub context: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Index of the step a resumed instance should dispatch next.
    ///
    /// A `Running` checkpoint records a completed step, so work continues
    /// after it; an `AwaitingRetry` checkpoint records a failed attempt that
    /// must be retried.
    pub fn resume_step_index(&self) -> usize {
        match self.status {
            WorkflowStatus::AwaitingRetry => self.step_index,
            _ => self.step_index + 1,
        }
    }
}
