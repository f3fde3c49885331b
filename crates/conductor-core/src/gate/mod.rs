//! Authority/ethics gate: the policy checkpoint every agent action passes.
//!
//! Evaluation is a pure function of the action, the agent's autonomy level
//! and the policy context:
//!
//! - `RecommendOnly` escalates anything state-mutating; read-only actions pass.
//! - `ActWithConfirmation` allows allowlisted action types and escalates the rest.
//! - `FullyAutonomous` allows unless the action is deny-listed, irreversible,
//!   externally visible or over budget, in which case it is denied.
//!
//! [`AuthorityGate::check`] additionally appends every decision to the
//! [`ApprovalLog`] so the audit trail is complete regardless of outcome.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConductorError;
use crate::models::agent::AutonomyLevel;
use crate::models::approval::{ActionApprovalDecision, ActionDescriptor, Decision};
use crate::store::ApprovalLog;

/// Policy inputs to a gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContext {
    /// Action types `ActWithConfirmation` agents may perform unattended.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Action types `FullyAutonomous` agents may never perform.
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Cost above which an action counts as high-budget.
    #[serde(default)]
    pub budget_limit: Option<f64>,
    #[serde(default = "default_true")]
    pub deny_irreversible: bool,
    #[serde(default = "default_true")]
    pub deny_externally_visible: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            denylist: Vec::new(),
            budget_limit: None,
            deny_irreversible: true,
            deny_externally_visible: true,
        }
    }
}

impl PolicyContext {
    fn allowlisted(&self, action: &ActionDescriptor) -> bool {
        self.allowlist.iter().any(|t| t == &action.action_type)
    }

    /// Why `action` is on the deny-list, if it is.
    fn deny_reason(&self, action: &ActionDescriptor) -> Option<String> {
        if self.denylist.iter().any(|t| t == &action.action_type) {
            return Some(format!("action type '{}' is deny-listed", action.action_type));
        }
        if self.deny_irreversible && action.irreversible {
            return Some("irreversible actions require human approval".to_string());
        }
        if self.deny_externally_visible && action.externally_visible {
            return Some("externally visible actions require human approval".to_string());
        }
        match (action.estimated_cost, self.budget_limit) {
            (Some(cost), Some(limit)) if cost > limit => Some(format!(
                "estimated cost {:.2} exceeds budget limit {:.2}",
                cost, limit
            )),
            _ => None,
        }
    }
}

/// Pure policy evaluation: decision plus a human-readable reason.
pub fn evaluate(
    action: &ActionDescriptor,
    autonomy: AutonomyLevel,
    ctx: &PolicyContext,
) -> (Decision, String) {
    match autonomy {
        AutonomyLevel::RecommendOnly => {
            if action.state_mutating || action.irreversible {
                (
                    Decision::Escalate,
                    "recommend-only agents cannot mutate state without a human decision".to_string(),
                )
            } else {
                (Decision::Allow, "read-only recommendation".to_string())
            }
        }
        AutonomyLevel::ActWithConfirmation => {
            if ctx.allowlisted(action) {
                (
                    Decision::Allow,
                    format!("action type '{}' is pre-approved", action.action_type),
                )
            } else {
                (
                    Decision::Escalate,
                    format!("action type '{}' is not pre-approved", action.action_type),
                )
            }
        }
        AutonomyLevel::FullyAutonomous => match ctx.deny_reason(action) {
            Some(reason) => (Decision::Deny, reason),
            None => (Decision::Allow, "within autonomous authority".to_string()),
        },
    }
}

/// Gate bound to a default policy and an audit log.
#[derive(Clone)]
pub struct AuthorityGate {
    policy: PolicyContext,
    audit: ApprovalLog,
}

impl AuthorityGate {
    pub fn new(policy: PolicyContext, audit: ApprovalLog) -> Self {
        Self { policy, audit }
    }

    pub fn policy(&self) -> &PolicyContext {
        &self.policy
    }

    pub fn audit_log(&self) -> &ApprovalLog {
        &self.audit
    }

    /// Build the decision record without recording it.
    pub fn evaluate(
        &self,
        agent_id: &str,
        action: &ActionDescriptor,
        autonomy: AutonomyLevel,
        ctx: &PolicyContext,
    ) -> ActionApprovalDecision {
        let (decision, reason) = evaluate(action, autonomy, ctx);
        ActionApprovalDecision {
            id: Uuid::new_v4().to_string(),
            action: action.clone(),
            agent_id: agent_id.to_string(),
            autonomy,
            decision,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Evaluate against the default policy and record the decision.
    pub async fn check(
        &self,
        agent_id: &str,
        action: &ActionDescriptor,
        autonomy: AutonomyLevel,
    ) -> Result<ActionApprovalDecision, ConductorError> {
        let record = self.evaluate(agent_id, action, autonomy, &self.policy);
        self.audit.record(&record).await?;
        if record.decision != Decision::Allow {
            tracing::info!(
                "[Gate] {} for agent {} on '{}': {}",
                record.decision.as_str(),
                agent_id,
                action.action_type,
                record.reason
            );
        }
        Ok(record)
    }

    /// Record the outcome of a human review of an escalated decision.
    pub async fn record_resolution(
        &self,
        escalated: &ActionApprovalDecision,
        approved: bool,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<ActionApprovalDecision, ConductorError> {
        let mut reason = format!(
            "escalation {} by {}",
            if approved { "approved" } else { "rejected" },
            reviewer
        );
        if let Some(note) = note {
            reason.push_str(": ");
            reason.push_str(note);
        }
        let record = ActionApprovalDecision {
            id: Uuid::new_v4().to_string(),
            action: escalated.action.clone(),
            agent_id: escalated.agent_id.clone(),
            autonomy: escalated.autonomy,
            decision: if approved { Decision::Allow } else { Decision::Deny },
            reason,
            timestamp: Utc::now(),
        };
        self.audit.record(&record).await?;
        Ok(record)
    }
}
