//! Persisted record
//!
//! An in-memory copy of one JSON record plus the rules for keeping it in
//! the store:
//!
//! - every mutation writes the whole record back
//! - mutations are serialized through a FIFO lock, so the store sees them
//!   in call order and never interleaved
//! - store failures never lose the in-memory copy

use crate::storage::{KeyValueStore, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

/// How a load resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// The stored record was read
    Loaded,
    /// Nothing stored under the key; in-memory copy kept
    Missing,
    /// The stored record was malformed; reset to defaults
    Reset,
    /// The store could not be read; in-memory copy kept
    Unavailable,
}

/// One JSON record mirrored in memory
pub struct PersistedRecord<T> {
    store: Arc<dyn KeyValueStore>,
    key: RwLock<String>,
    data: RwLock<T>,
    /// Held across the store write of each mutation
    write_lock: Mutex<()>,
}

impl<T> PersistedRecord<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// A record with default contents; call [`load`](Self::load) to hydrate
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: RwLock::new(key.into()),
            data: RwLock::new(T::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> String {
        read(&self.key).clone()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Copy of the in-memory record
    pub fn snapshot(&self) -> T {
        read(&self.data).clone()
    }

    /// Read part of the in-memory record without cloning all of it
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&read(&self.data))
    }

    /// Replace the in-memory copy with the stored record.
    ///
    /// Used on init and to pick up writes from other tabs.
    pub async fn load(&self) -> LoadState {
        let _guard = self.write_lock.lock().await;
        let key = self.key();

        match self.store.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(data) => {
                    *write(&self.data) = data;
                    LoadState::Loaded
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Malformed record, resetting to defaults");
                    *write(&self.data) = T::default();
                    LoadState::Reset
                }
            },
            Ok(None) => LoadState::Missing,
            Err(StorageError::MalformedRecord { reason, .. }) => {
                tracing::warn!(key = %key, error = %reason, "Malformed record, resetting to defaults");
                *write(&self.data) = T::default();
                LoadState::Reset
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not load record, using in-memory copy");
                LoadState::Unavailable
            }
        }
    }

    /// Mutate the in-memory record and persist the result.
    ///
    /// The mutation sticks even if persisting fails.
    pub async fn update(&self, f: impl FnOnce(&mut T)) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        let value = {
            let mut data = write(&self.data);
            f(&mut data);
            serde_json::to_value(&*data)?
        };

        self.write_value(&value).await
    }

    /// Write the in-memory record under the current key
    pub async fn persist(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let value = serde_json::to_value(&*read(&self.data))?;
        self.write_value(&value).await
    }

    /// Delete the stored record under the current key
    pub async fn delete_persisted(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&self.key()).await
    }

    /// Change the in-memory key. Nothing is written.
    pub fn rename(&self, new_key: impl Into<String>) {
        *write(&self.key) = new_key.into();
    }

    async fn write_value(&self, value: &serde_json::Value) -> StorageResult<()> {
        let key = self.key();
        self.store.set(&key, value).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Failed to persist record, kept in memory");
            e
        })
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
