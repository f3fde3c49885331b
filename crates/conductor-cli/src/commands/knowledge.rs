//! `conductor knowledge`: Query recorded learning insights.

use conductor_core::state::AppState;

use super::print_json;

pub async fn query(state: &AppState, topic: &str, limit: usize) -> Result<(), String> {
    let scored = state
        .knowledge
        .query_scored(topic, limit)
        .await
        .map_err(|e| e.to_string())?;

    let insights: Vec<serde_json::Value> = scored
        .iter()
        .map(|s| {
            serde_json::json!({
                "score": s.score,
                "insight": s.insight,
            })
        })
        .collect();
    print_json(&serde_json::json!({ "topic": topic, "insights": insights }));
    Ok(())
}
