//! Conductor Core: durable workflows, multi-agent coordination and action
//! governance for autonomous agents.
//!
//! This crate contains the domain logic, stores and runtime components. It has
//! no transport dependency, making it suitable for use in:
//!
//! - the `conductor` CLI (via `conductor-cli`)
//! - long-running services that embed the engine
//! - tests that drive the runtime in-process over `MemoryStorage`

pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod models;
pub mod orchestration;
pub mod reasoning;
pub mod state;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Convenience re-exports
pub use config::ConductorConfig;
pub use db::Database;
pub use error::{ConductorError, ErrorKind};
pub use state::{AppState, AppStateInner};
