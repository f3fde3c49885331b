//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! conductor-core runtime through `AppState`.

pub mod agent;
pub mod coordinate;
pub mod gate;
pub mod knowledge;
pub mod workflow;

use std::sync::Arc;

use conductor_core::config::{ConductorConfig, StorageBackend};
use conductor_core::state::{AppState, AppStateInner};

/// Build the configuration: the config file (if any), then `--db`, then
/// `CONDUCTOR_*` environment overrides.
pub fn load_config(config_path: Option<&str>, db_path: &str) -> Result<ConductorConfig, String> {
    let mut config = match config_path {
        Some(path) => ConductorConfig::load(path).map_err(|e| e.to_string())?,
        None => ConductorConfig::default(),
    };
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.path = db_path.to_string();
    config.apply_env_overrides();
    Ok(config)
}

/// Initialize a shared `AppState` backed by the SQLite database at `db_path`.
pub fn init_state(config_path: Option<&str>, db_path: &str) -> AppState {
    let config = load_config(config_path, db_path).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    let state = AppStateInner::from_config(config).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });
    Arc::new(state)
}

/// Load .env and .env.local files for environment variables.
pub fn load_dotenv() {
    // Try .env.local first (higher priority), then .env
    for filename in &[".env.local", ".env"] {
        let path = std::path::Path::new(filename);
        if !path.exists() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                // Existing env vars take priority
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
        tracing::info!("[Cli] Loaded environment from '{}'", filename);
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Serialize any value and pretty-print it.
pub fn print_serialized<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_value(value).map_err(|e| e.to_string())?;
    print_json(&json);
    Ok(())
}
