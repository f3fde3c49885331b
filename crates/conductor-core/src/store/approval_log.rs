use std::sync::Arc;

use crate::error::ConductorError;
use crate::models::approval::ActionApprovalDecision;
use crate::storage::{self, DurableStorage};

const PREFIX: &str = "approvals/";

/// Append-only audit trail of gate decisions.
#[derive(Clone)]
pub struct ApprovalLog {
    storage: Arc<dyn DurableStorage>,
}

impl ApprovalLog {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, decision: &ActionApprovalDecision) -> Result<(), ConductorError> {
        let key = format!(
            "{}{:020}-{}",
            PREFIX,
            decision.timestamp.timestamp_micros().max(0),
            decision.id
        );
        if self.storage.get(&key).await?.is_some() {
            return Err(ConductorError::permanent(format!(
                "Approval decision {} already recorded",
                decision.id
            )));
        }
        storage::put_json(self.storage.as_ref(), &key, decision).await
    }

    /// Every recorded decision, oldest first.
    pub async fn list(&self) -> Result<Vec<ActionApprovalDecision>, ConductorError> {
        storage::list_json(self.storage.as_ref(), PREFIX).await
    }

    pub async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<ActionApprovalDecision>, ConductorError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|d| d.agent_id == agent_id)
            .collect())
    }
}
