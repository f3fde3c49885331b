//! `conductor gate`: Evaluate a proposed action against the authority gate.

use conductor_core::models::approval::ActionDescriptor;
use conductor_core::state::AppState;

use super::print_serialized;

/// Flags describing the proposed action.
#[derive(Debug, Clone, Default)]
pub struct ActionFlags {
    pub mutating: bool,
    pub irreversible: bool,
    pub externally_visible: bool,
    pub cost: Option<f64>,
}

impl ActionFlags {
    pub fn describe(&self, action_type: &str) -> ActionDescriptor {
        let mut action = if self.mutating {
            ActionDescriptor::mutating(action_type)
        } else {
            ActionDescriptor::read_only(action_type)
        };
        if self.irreversible {
            action = action.irreversible();
        }
        if self.externally_visible {
            action = action.externally_visible();
        }
        if let Some(cost) = self.cost {
            action = action.with_cost(cost);
        }
        action
    }
}

pub async fn evaluate(
    state: &AppState,
    agent_id: &str,
    action_type: &str,
    flags: &ActionFlags,
) -> Result<(), String> {
    let action = flags.describe(action_type);
    let decision = state
        .evaluate_action(agent_id, &action)
        .await
        .map_err(|e| e.to_string())?;
    print_serialized(&decision)
}

/// Print the recorded decisions, optionally for one agent.
pub async fn audit(state: &AppState, agent_id: Option<&str>) -> Result<(), String> {
    let log = state.gate.audit_log();
    let decisions = match agent_id {
        Some(id) => log.list_by_agent(id).await,
        None => log.list().await,
    }
    .map_err(|e| e.to_string())?;
    print_serialized(&serde_json::json!({ "decisions": decisions }))
}
