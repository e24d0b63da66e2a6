//! Global record
//!
//! Process-wide state stored under `global`: the last active user, the
//! first-visit flag, the last version that ran, and feature flags.

use crate::session::record::{LoadState, PersistedRecord};
use crate::session::types::{GlobalData, GlobalPatch, GLOBAL_KEY};
use crate::storage::{KeyValueStore, StorageResult};
use std::sync::Arc;

pub struct GlobalSession {
    record: PersistedRecord<GlobalData>,
}

impl GlobalSession {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            record: PersistedRecord::new(store, GLOBAL_KEY),
        }
    }

    pub async fn init(&self) -> LoadState {
        self.record.load().await
    }

    pub fn data(&self) -> GlobalData {
        self.record.snapshot()
    }

    pub async fn update(&self, patch: GlobalPatch) -> StorageResult<()> {
        self.record.update(|data| patch.apply(data)).await
    }

    pub fn last_active_user(&self) -> Option<String> {
        self.record.read(|d| d.last_active_user.clone())
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.record
            .read(|d| d.feature_flags.get(name).copied().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_global_roundtrip() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let global = GlobalSession::new(Arc::clone(&store));
        assert_eq!(global.init().await, LoadState::Missing);
        assert!(global.data().is_first_time_visit);

        global
            .update(GlobalPatch::new().last_active_user("alice").feature_flag("beta", true))
            .await
            .unwrap();

        let reopened = GlobalSession::new(store);
        assert_eq!(reopened.init().await, LoadState::Loaded);
        assert_eq!(reopened.last_active_user().as_deref(), Some("alice"));
        assert!(reopened.feature_enabled("beta"));
        assert!(!reopened.feature_enabled("missing"));
    }

    #[tokio::test]
    async fn test_stored_shape() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let global = GlobalSession::new(Arc::clone(&store));
        global
            .update(GlobalPatch::new().photon_version("1.2.0"))
            .await
            .unwrap();

        let stored = store.get(GLOBAL_KEY).await.unwrap().unwrap();
        assert_eq!(stored["photonVersion"], json!("1.2.0"));
        assert_eq!(stored["isFirstTimeVisit"], json!(true));
    }
}
