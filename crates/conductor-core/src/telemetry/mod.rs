//! Telemetry sinks.
//!
//! Components publish lifecycle events (`workflow.step.completed`,
//! `coordination.session.finished`, ...) through [`TelemetrySink::emit`].
//! Emission is fire-and-forget: a sink never reports failure to its caller.

mod jsonl;

pub use jsonl::{JsonlTelemetry, TelemetryWriteError};

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One published event, as persisted by file-backed sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub event: String,
    pub attributes: Value,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(event: &str, attributes: Value) -> Self {
        Self {
            event: event.to_string(),
            attributes,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, event: &str, attributes: Value);

    /// Wait for buffered events to reach their destination.
    async fn flush(&self) {}
}

/// Logs every event through `tracing` at debug level.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn emit(&self, event: &str, attributes: Value) {
        tracing::debug!(target: "conductor_core::telemetry", event, %attributes, "telemetry");
    }
}

#[derive(Debug, Default, Clone)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn emit(&self, _event: &str, _attributes: Value) {}
}

/// Keeps events in memory; handy for asserting on emitted events.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    async fn emit(&self, event: &str, attributes: Value) {
        let record = TelemetryEvent::new(event, attributes);
        match self.events.lock() {
            Ok(mut events) => events.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemoryTelemetry::new();
        sink.emit("a", json!({"n": 1})).await;
        sink.emit("b", json!({})).await;
        assert_eq!(sink.names(), vec!["a", "b"]);
        assert_eq!(sink.events()[0].attributes["n"], 1);
    }
}
