//! Per-tab collaborators shared by every session of a registry

use crate::lock::LockConfig;
use crate::observer::Observers;
use crate::shared::TabStorage;
use crate::storage::KeyValueStore;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub struct SessionContext {
    pub store: Arc<dyn KeyValueStore>,
    pub tab: TabStorage,
    pub observers: Observers,
    pub lock_config: LockConfig,
    /// Id of the session currently shown to the user
    active: RwLock<Option<Uuid>>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>, tab: TabStorage, lock_config: LockConfig) -> Self {
        Self {
            store,
            tab,
            observers: Observers::new(),
            lock_config,
            active: RwLock::new(None),
        }
    }

    pub fn is_active(&self, session_id: Uuid) -> bool {
        self.active
            .read()
            .map(|active| *active == Some(session_id))
            .unwrap_or(false)
    }

    pub(crate) fn set_active(&self, session_id: Uuid) {
        if let Ok(mut active) = self.active.write() {
            *active = Some(session_id);
        }
    }
}
