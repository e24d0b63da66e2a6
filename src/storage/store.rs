//! Record store contract
//!
//! Every persisted blob (user records, the global record, seen posts) goes
//! through [`KeyValueStore`]. Values are arbitrary JSON documents keyed by
//! string.

use crate::storage::error::StorageResult;
use crate::storage::memory::MemoryStore;
use crate::storage::sqlite::SqliteStore;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Asynchronous JSON key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`, if any
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// True if the schema was created or upgraded when this store was opened.
    ///
    /// Fixed for the lifetime of the store; migrations gate on it.
    fn was_upgraded(&self) -> bool;
}

/// Whether records survive the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Backed by the on-disk database
    Durable,
    /// The database could not be opened; records live only in memory
    InMemoryOnly,
}

/// Configuration for the record store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for all data
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("photon_data"),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Get path to the record database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("session.db")
    }
}

/// Open the durable store, degrading to an in-memory one if that fails.
///
/// Never returns an error: an unavailable database only costs persistence.
pub fn open_store(config: &StoreConfig) -> (Arc<dyn KeyValueStore>, Persistence) {
    match SqliteStore::open(config) {
        Ok(store) => (Arc::new(store), Persistence::Durable),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = ?config.db_path(),
                "Record store unavailable, continuing with in-memory defaults"
            );
            (Arc::new(MemoryStore::new()), Persistence::InMemoryOnly)
        }
    }
}
