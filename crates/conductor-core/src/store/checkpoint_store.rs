use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::error::ConductorError;
use crate::models::checkpoint::Checkpoint;
use crate::storage::{self, DurableStorage, KeyedLocks};

const PREFIX: &str = "checkpoints/";

/// Append-only record of per-instance progress snapshots.
///
/// Keys are `checkpoints/{instance}/{sequence:020}`, so a prefix scan yields
/// an instance's checkpoints in sequence order. Writes are serialized per
/// instance; reads are not.
#[derive(Clone)]
pub struct CheckpointStore {
    storage: Arc<dyn DurableStorage>,
    locks: KeyedLocks,
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Append `checkpoint`; its sequence must be exactly one past the latest.
    pub async fn save(&self, instance_id: &str, checkpoint: &Checkpoint) -> Result<(), ConductorError> {
        validate_instance_id(instance_id)?;
        if checkpoint.instance_id != instance_id {
            return Err(ConductorError::permanent(format!(
                "Checkpoint belongs to instance {}, not {}",
                checkpoint.instance_id, instance_id
            )));
        }

        let _guard = self.locks.lock(instance_id).await;
        let expected = self
            .latest(instance_id)
            .await?
            .map(|c| c.sequence + 1)
            .unwrap_or(1);
        if checkpoint.sequence != expected {
            tracing::warn!(
                "[CheckpointStore] Rejected out-of-order checkpoint for {}: expected {}, got {}",
                instance_id,
                expected,
                checkpoint.sequence
            );
            return Err(ConductorError::SequenceConflict {
                instance_id: instance_id.to_string(),
                expected,
                actual: checkpoint.sequence,
            });
        }

        storage::put_json(
            self.storage.as_ref(),
            &checkpoint_key(instance_id, checkpoint.sequence),
            checkpoint,
        )
        .await?;
        tracing::debug!(
            "[CheckpointStore] Saved checkpoint {} #{} (step {}, {})",
            instance_id,
            checkpoint.sequence,
            checkpoint.step_index,
            checkpoint.status
        );
        Ok(())
    }

    /// The authoritative resume point for an instance.
    pub async fn get_latest(&self, instance_id: &str) -> Result<Checkpoint, ConductorError> {
        self.latest(instance_id).await?.ok_or_else(|| {
            ConductorError::not_found(format!("No checkpoint for instance {}", instance_id))
        })
    }

    /// All checkpoints of an instance in ascending sequence order.
    pub async fn list(&self, instance_id: &str) -> Result<Vec<Checkpoint>, ConductorError> {
        storage::list_json(self.storage.as_ref(), &instance_prefix(instance_id)).await
    }

    /// Ids of every instance that has at least one checkpoint.
    pub async fn list_instance_ids(&self) -> Result<Vec<String>, ConductorError> {
        let ids: BTreeSet<String> = self
            .storage
            .query_by_prefix(PREFIX)
            .await?
            .into_iter()
            .filter_map(|(key, _)| {
                key[PREFIX.len()..]
                    .split('/')
                    .next()
                    .map(|id| id.to_string())
            })
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Remove every checkpoint of an instance. Returns how many were removed.
    pub async fn purge_instance(&self, instance_id: &str) -> Result<usize, ConductorError> {
        let _guard = self.locks.lock(instance_id).await;
        let rows = self.storage.query_by_prefix(&instance_prefix(instance_id)).await?;
        let mut removed = 0;
        for (key, _) in rows {
            if self.storage.delete(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("[CheckpointStore] Purged {} checkpoint(s) of {}", removed, instance_id);
        }
        Ok(removed)
    }

    /// Remove checkpoints older than `age`, always keeping the latest one.
    pub async fn purge_older_than(&self, instance_id: &str, age: Duration) -> Result<usize, ConductorError> {
        let _guard = self.locks.lock(instance_id).await;
        let checkpoints = self.list(instance_id).await?;
        let Some((latest, older)) = checkpoints.split_last() else {
            return Ok(0);
        };

        // An age reaching past the representable range covers nothing.
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(0);
        };
        let mut removed = 0;
        for cp in older.iter().filter(|c| c.timestamp < cutoff) {
            if self
                .storage
                .delete(&checkpoint_key(instance_id, cp.sequence))
                .await?
            {
                removed += 1;
            }
        }
        tracing::debug!(
            "[CheckpointStore] Purged {} aged checkpoint(s) of {}, kept #{}",
            removed,
            instance_id,
            latest.sequence
        );
        Ok(removed)
    }

    async fn latest(&self, instance_id: &str) -> Result<Option<Checkpoint>, ConductorError> {
        let rows = self.storage.query_by_prefix(&instance_prefix(instance_id)).await?;
        match rows.last() {
            Some((_, raw)) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

fn instance_prefix(instance_id: &str) -> String {
    format!("{}{}/", PREFIX, instance_id)
}

fn checkpoint_key(instance_id: &str, sequence: u64) -> String {
    format!("{}{}/{:020}", PREFIX, instance_id, sequence)
}

fn validate_instance_id(instance_id: &str) -> Result<(), ConductorError> {
    if instance_id.is_empty() || instance_id.contains('/') {
        return Err(ConductorError::permanent(format!(
            "Invalid workflow instance id: '{}'",
            instance_id
        )));
    }
    Ok(())
}
