//! `conductor workflow`: Run, inspect and recover durable workflows.

use std::time::Duration;

use conductor_core::models::workflow::{WorkflowInstance, WorkflowStatus};
use conductor_core::state::AppState;
use conductor_core::workflow::WorkflowDefinition;

use super::print_serialized;

/// Parse `--input`: JSON if it parses, otherwise a plain string.
fn parse_input(input: Option<&str>) -> serde_json::Value {
    match input {
        None => serde_json::Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    }
}

async fn register_file(state: &AppState, workflow_file: &str) -> Result<WorkflowDefinition, String> {
    let workflow = WorkflowDefinition::from_file(workflow_file)?;
    state
        .engine
        .register_definition(workflow.clone())
        .await
        .map_err(|e| e.to_string())?;
    Ok(workflow)
}

/// Run a workflow from a YAML file and wait for it to finish.
pub async fn run(state: &AppState, workflow_file: &str, input: Option<&str>) -> Result<(), String> {
    let workflow = register_file(state, workflow_file).await?;
    println!("📄 Loaded workflow: {} v{} ({})", workflow.name, workflow.version, workflow_file);
    println!("   {} step(s)", workflow.steps.len());

    let instance_id = state
        .start_workflow(&workflow.name, parse_input(input))
        .await
        .map_err(|e| e.to_string())?;
    println!("   Instance: {}", instance_id);
    println!();

    let instance = state
        .engine
        .await_terminal(&instance_id)
        .await
        .map_err(|e| e.to_string())?;
    report(&instance)
}

fn report(instance: &WorkflowInstance) -> Result<(), String> {
    for result in &instance.step_results {
        let mark = if result.success { "✅" } else { "❌" };
        println!(
            "{} {} (attempts: {})",
            mark, result.step_name, result.attempts
        );
        match (&result.error, result.output.as_str()) {
            (Some(error), _) => println!("   {}", error),
            (None, Some(output)) if !output.is_empty() => println!("   {}", truncate(output, 200)),
            _ => {}
        }
    }

    match instance.status {
        WorkflowStatus::Completed => {
            println!("\n🎉 Workflow {} completed successfully!", instance.id);
            Ok(())
        }
        status => {
            let reason = instance
                .failure
                .as_ref()
                .map(|f| format!("step '{}': {}", f.step_name, f.reason))
                .unwrap_or_default();
            Err(format!("Workflow {} {} {}", instance.id, status, reason))
        }
    }
}

/// Validate a workflow YAML file without executing it.
pub async fn validate(state: &AppState, workflow_file: &str) -> Result<(), String> {
    let workflow = register_file(state, workflow_file).await?;

    println!("✅ Workflow '{}' is valid", workflow.name);
    println!("   Version: {}", workflow.version);
    println!("   Steps: {}", workflow.steps.len());

    for (i, step) in workflow.steps.iter().enumerate() {
        let attempts = step
            .retry
            .as_ref()
            .and_then(|r| r.max_attempts)
            .unwrap_or(state.config.retry.max_attempts);
        println!(
            "   {}. {} (handler: {}, attempts: {}, on failure: {:?})",
            i + 1,
            step.name,
            step.handler,
            attempts,
            step.on_failure
        );
    }

    Ok(())
}

/// Print the state of an instance, reconstructed from its latest checkpoint.
pub async fn status(state: &AppState, instance_id: &str, checkpoints: bool) -> Result<(), String> {
    let instance = state
        .get_workflow_status(instance_id)
        .await
        .map_err(|e| e.to_string())?;
    if checkpoints {
        let list = state
            .engine
            .checkpoints()
            .list(instance_id)
            .await
            .map_err(|e| e.to_string())?;
        return print_serialized(&serde_json::json!({ "instance": instance, "checkpoints": list }));
    }
    print_serialized(&instance)
}

/// Register the given definitions, resume every interrupted instance and
/// wait for all of them.
pub async fn recover(state: &AppState, workflow_files: &[String]) -> Result<(), String> {
    for file in workflow_files {
        let workflow = register_file(state, file).await?;
        tracing::info!("[Workflow] Registered '{}' for recovery", workflow.name);
    }

    let resumed = state.engine.recover().await.map_err(|e| e.to_string())?;
    if resumed.is_empty() {
        println!("Nothing to recover.");
        return Ok(());
    }
    println!("Resuming {} instance(s)", resumed.len());

    let mut failed = Vec::new();
    for instance_id in &resumed {
        let instance = state
            .engine
            .await_terminal(instance_id)
            .await
            .map_err(|e| e.to_string())?;
        println!("   {} → {}", instance_id, instance.status);
        if instance.status != WorkflowStatus::Completed {
            failed.push(instance_id.clone());
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!("Instances not completed: {}", failed.join(", ")))
    }
}

/// Delete one instance's checkpoints, or compact every instance's history.
pub async fn purge(state: &AppState, instance_id: Option<&str>, older_than_hours: Option<u64>) -> Result<(), String> {
    if let Some(id) = instance_id {
        let removed = state.engine.purge_instance(id).await.map_err(|e| e.to_string())?;
        println!("Removed {} checkpoint(s) of {}", removed, id);
        return Ok(());
    }
    let age = older_than_hours
        .map(|h| Duration::from_secs(h.saturating_mul(3600)))
        .unwrap_or_else(|| state.config.engine.checkpoint_retention());
    let removed = state.engine.compact_history(age).await.map_err(|e| e.to_string())?;
    println!("Removed {} checkpoint(s) older than {:?}", removed, age);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
