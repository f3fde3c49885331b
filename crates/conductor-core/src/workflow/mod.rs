//! Durable workflows: YAML-defined step pipelines that survive restarts.
//!
//! # Architecture
//!
//! ```text
//! workflow.yaml ──► WorkflowDefinition ──► WorkflowEngine ──► StepRegistry
//!                                              │                 ├─ echo
//!                                              │                 ├─ reason     (ReasoningService)
//!                                              │                 └─ coordinate (Coordinator)
//!                                              ▼
//!                                       CheckpointStore ──► DurableStorage
//! ```

pub mod engine;
pub mod retry;
pub mod schema;
pub mod step;
pub mod template;

pub use engine::{instance_from_checkpoint, EngineConfig, WorkflowEngine};
pub use retry::RetryPolicy;
pub use schema::{CoordinateConfig, OnFailure, RetryOverride, WorkflowDefinition, WorkflowStep};
pub use step::{CoordinationStep, EchoStep, ReasoningStep, StepContext, StepHandler, StepRegistry};
