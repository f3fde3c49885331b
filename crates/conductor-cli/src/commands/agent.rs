//! `conductor agent`: Agent registry commands.

use conductor_core::models::agent::{AutonomyLevel, RegisterAgentInput};
use conductor_core::state::AppState;

use super::print_serialized;

pub async fn register(
    state: &AppState,
    agent_type: &str,
    autonomy: &str,
    id: Option<&str>,
    description: Option<&str>,
    capabilities: Vec<String>,
) -> Result<(), String> {
    let autonomy = AutonomyLevel::from_str(autonomy).ok_or_else(|| {
        format!(
            "Unknown autonomy level '{}'. Expected RECOMMEND_ONLY, ACT_WITH_CONFIRMATION or FULLY_AUTONOMOUS",
            autonomy
        )
    })?;
    let mut input = RegisterAgentInput::new(agent_type, autonomy);
    input.id = id.map(|s| s.to_string());
    input.description = description.unwrap_or_default().to_string();
    input.capabilities = capabilities;

    let agent = state.register_agent(input).await.map_err(|e| e.to_string())?;
    print_serialized(&agent)
}

pub async fn list(state: &AppState, include_retired: bool) -> Result<(), String> {
    let agents = state
        .agents
        .list(include_retired)
        .await
        .map_err(|e| e.to_string())?;
    print_serialized(&serde_json::json!({ "agents": agents }))
}

pub async fn get(state: &AppState, agent_id: &str) -> Result<(), String> {
    let agent = state.agents.get_by_id(agent_id).await.map_err(|e| e.to_string())?;
    print_serialized(&agent)
}

pub async fn retire(state: &AppState, agent_id: &str) -> Result<(), String> {
    let agent = state.retire_agent(agent_id).await.map_err(|e| e.to_string())?;
    print_serialized(&agent)
}
