//! `conductor coordinate`: Run one coordination session over registered agents.

use conductor_core::models::coordination::{
    CoordinationPattern, CoordinationTask, EscalationResolution, SessionStatus,
};
use conductor_core::state::AppState;

use super::gate::ActionFlags;
use super::print_serialized;

pub async fn run(
    state: &AppState,
    task: &str,
    pattern: &str,
    agents: &[String],
    action_type: &str,
    flags: &ActionFlags,
    approve_as: Option<&str>,
) -> Result<(), String> {
    let pattern = CoordinationPattern::from_str(pattern).ok_or_else(|| {
        format!(
            "Unknown pattern '{}'. Expected PARALLEL, HIERARCHICAL, COMPETITIVE or COLLABORATIVE_SWARM",
            pattern
        )
    })?;
    let task = CoordinationTask::new(task, flags.describe(action_type).with_description(task));

    let mut session = state
        .coordinate(task, pattern, agents)
        .await
        .map_err(|e| e.to_string())?;

    // Sessions live in this process only, so an escalation is either
    // approved here or reported back.
    if session.status == SessionStatus::Suspended {
        match approve_as {
            Some(reviewer) => {
                tracing::info!(
                    "[Coordinate] Approving {} escalation(s) as {}",
                    session.pending_escalations.len(),
                    reviewer
                );
                session = state
                    .resolve_escalation(
                        &session.id,
                        EscalationResolution {
                            approved: true,
                            reviewer: reviewer.to_string(),
                            note: Some("approved from the command line".to_string()),
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
            None => {
                print_serialized(&session)?;
                return Err(format!(
                    "Session {} needs approval for {} agent(s); rerun with --approve-as <reviewer>",
                    session.id,
                    session.pending_escalations.len()
                ));
            }
        }
    }

    print_serialized(&session)?;
    match session.status {
        SessionStatus::Completed => Ok(()),
        _ => Err(format!(
            "Session {} {}: {}",
            session.id,
            session.status.as_str(),
            session.failure_reason.unwrap_or_default()
        )),
    }
}
