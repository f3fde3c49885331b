use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::DurableStorage;
use crate::error::ConductorError;

/// In-process storage backed by an ordered map.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn put(&self, key: &str, value: String) -> Result<(), ConductorError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ConductorError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, ConductorError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn query_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConductorError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_query_is_ordered_and_bounded() {
        let storage = MemoryStorage::new();
        storage.put("a/2", "two".into()).await.unwrap();
        storage.put("a/1", "one".into()).await.unwrap();
        storage.put("ab/1", "other".into()).await.unwrap();
        storage.put("b/1", "bee".into()).await.unwrap();

        let rows = storage.query_by_prefix("a/").await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("a/1".to_string(), "one".to_string()),
                ("a/2".to_string(), "two".to_string())
            ]
        );

        assert!(storage.delete("a/1").await.unwrap());
        assert!(!storage.delete("a/1").await.unwrap());
        assert_eq!(storage.get("a/1").await.unwrap(), None);
    }
}
