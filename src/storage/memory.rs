//! In-memory record store
//!
//! Used in tests and as the fallback when the database cannot be opened.

use crate::storage::error::StorageResult;
use crate::storage::store::KeyValueStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Value>>,
    upgraded: bool,
}

impl MemoryStore {
    /// An empty store that reports no schema upgrade
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store that reports a fresh schema upgrade, as a newly
    /// created database would
    pub fn upgraded() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            upgraded: true,
        }
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn was_upgraded(&self) -> bool {
        self.upgraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
        assert!(!store.was_upgraded());

        store.set("u/alice", &json!({"x": true})).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("u/alice").await.unwrap(), Some(json!({"x": true})));

        store.delete("u/alice").await.unwrap();
        assert_eq!(store.get("u/alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upgraded_constructor() {
        assert!(MemoryStore::upgraded().was_upgraded());
    }
}
