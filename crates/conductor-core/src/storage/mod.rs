//! Durable key/value storage contract.
//!
//! The checkpoint store, agent registry, knowledge repository and approval
//! log all persist through [`DurableStorage`]. Any backend satisfying
//! `put`/`get`/`delete`/`query_by_prefix` is interchangeable:
//!
//! ```text
//! CheckpointStore ─┐
//! AgentRegistry ───┤
//! KnowledgeRepo ───┼──► Arc<dyn DurableStorage> ──► MemoryStorage | SqliteStorage
//! ApprovalLog ─────┘
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ConductorError;

#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn put(&self, key: &str, value: String) -> Result<(), ConductorError>;

    async fn get(&self, key: &str) -> Result<Option<String>, ConductorError>;

    /// Returns whether a value was present.
    async fn delete(&self, key: &str) -> Result<bool, ConductorError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    async fn query_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConductorError>;
}

/// Serialize `value` as JSON and store it under `key`.
pub async fn put_json<T: Serialize>(
    storage: &dyn DurableStorage,
    key: &str,
    value: &T,
) -> Result<(), ConductorError> {
    storage.put(key, serde_json::to_string(value)?).await
}

pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn DurableStorage,
    key: &str,
) -> Result<Option<T>, ConductorError> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn list_json<T: DeserializeOwned>(
    storage: &dyn DurableStorage,
    prefix: &str,
) -> Result<Vec<T>, ConductorError> {
    storage
        .query_by_prefix(prefix)
        .await?
        .into_iter()
        .map(|(_, raw)| serde_json::from_str(&raw).map_err(ConductorError::from))
        .collect()
}

type LockSlots = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Per-key async write locks.
///
/// Writers for the same key are serialized; writers for different keys and
/// all readers proceed concurrently. A key's slot is dropped once no guard
/// holds it and nobody waits on it.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: LockSlots,
}

/// Held lock for one key; releasing it frees the slot when it was the last user.
pub struct KeyedGuard {
    key: String,
    locks: LockSlots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let slot = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Slots are cloned under this map lock, so a count of one means the
        // map holds the only reference.
        if locks.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            locks.remove(&self.key);
        }
    }
}
