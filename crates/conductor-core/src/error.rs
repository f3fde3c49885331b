//! Core error type for the Conductor runtime.
//!
//! `ConductorError` is used throughout the core domain (stores, gate,
//! coordinator, engine). Every variant maps onto an [`ErrorKind`] so retry
//! logic branches on the kind of failure rather than on message text.

use serde::{Deserialize, Serialize};

/// Coarse classification of a failure, used by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Retry-eligible: timeouts, temporary unavailability.
    Transient,
    /// Non-retryable: malformed input, policy denial.
    Permanent,
    /// Checkpoint write-ordering violation (single-writer breach).
    SequenceConflict,
    /// Missing instance, agent, session or checkpoint.
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Permanent => "PERMANENT",
            Self::SequenceConflict => "SEQUENCE_CONFLICT",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConductorError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Sequence conflict on instance {instance_id}: expected {expected}, got {actual}")]
    SequenceConflict {
        instance_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) | Self::Storage(_) => ErrorKind::Transient,
            Self::Permanent(_) | Self::Internal(_) => ErrorKind::Permanent,
            Self::SequenceConflict { .. } => ErrorKind::SequenceConflict,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Whether the retry state machine may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<rusqlite::Error> for ConductorError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("Serialization error: {}", e))
    }
}
