use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use super::DurableStorage;
use crate::db::Database;
use crate::error::ConductorError;

/// Storage persisted in the `kv_entries` SQLite table.
#[derive(Clone)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DurableStorage for SqliteStorage {
    async fn put(&self, key: &str, value: String) -> Result<(), ConductorError> {
        let key = key.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                       value = excluded.value,
                       updated_at = excluded.updated_at",
                    rusqlite::params![key, value, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ConductorError> {
        let key = key.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, ConductorError> {
        let key = key.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM kv_entries WHERE key = ?1", rusqlite::params![key])?;
                Ok(n > 0)
            })
            .await
    }

    async fn query_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConductorError> {
        let prefix = prefix.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM kv_entries
                     WHERE substr(key, 1, length(?1)) = ?1
                     ORDER BY key ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_roundtrip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.db");
        let path = path.to_string_lossy().to_string();

        {
            let storage = SqliteStorage::new(Database::open(&path).unwrap());
            storage.put("checkpoints/wf-1/1", "{}".into()).await.unwrap();
            storage.put("checkpoints/wf-1/2", "{\"a\":1}".into()).await.unwrap();
            storage.put("checkpoints/wf-2/1", "{}".into()).await.unwrap();
        }

        let storage = SqliteStorage::new(Database::open(&path).unwrap());
        let rows = storage.query_by_prefix("checkpoints/wf-1/").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, "{\"a\":1}");

        assert!(storage.delete("checkpoints/wf-2/1").await.unwrap());
        assert_eq!(storage.get("checkpoints/wf-2/1").await.unwrap(), None);
    }
}
