//! Cross-tab shared storage
//!
//! A small synchronous string map shared by every tab of one profile, plus a
//! change feed. Each tab works through its own [`TabStorage`] handle; writes
//! are broadcast as [`StorageEvent`]s and a tab only ever observes events
//! caused by *other* tabs.
//!
//! This is the side channel the auth lock and legacy flat keys live on.
//! Delivery is best effort: a receiver that falls behind sees
//! `RecvError::Lagged` and must re-read the state it cares about.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use tokio::sync::broadcast::error::RecvError;

/// Identity of one tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change made by some tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed
    pub new_value: Option<String>,
    pub origin: TabId,
}

impl StorageEvent {
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}

type Items = Arc<Mutex<HashMap<String, String>>>;

/// Backing map for one browser profile
#[derive(Clone)]
pub struct SharedStorage {
    items: Items,
    events: broadcast::Sender<StorageEvent>,
}

impl Default for SharedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStorage {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with a specific change-feed capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Seed the map, e.g. with legacy flat keys
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        {
            let mut items = lock_items(&storage.items);
            for (k, v) in entries {
                items.insert(k.into(), v.into());
            }
        }
        storage
    }

    /// Open a handle for a new tab
    pub fn tab(&self) -> TabStorage {
        TabStorage {
            id: TabId::new(),
            items: Arc::clone(&self.items),
            events: self.events.clone(),
        }
    }
}

/// One tab's view of the shared storage
#[derive(Clone)]
pub struct TabStorage {
    id: TabId,
    items: Items,
    events: broadcast::Sender<StorageEvent>,
}

impl TabStorage {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        lock_items(&self.items).get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock_items(&self.items).contains_key(key)
    }

    /// Set `key`; other tabs are notified if the value changed
    pub fn set_item(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let mut items = lock_items(&self.items);
        let old_value = items.insert(key.to_string(), value.clone());

        if old_value.as_deref() != Some(value.as_str()) {
            self.emit(key, old_value, Some(value));
        }
    }

    /// Remove `key`, returning the previous value; other tabs are notified
    /// if it existed
    pub fn remove_item(&self, key: &str) -> Option<String> {
        let mut items = lock_items(&self.items);
        let old_value = items.remove(key);

        if old_value.is_some() {
            self.emit(key, old_value.clone(), None);
        }
        old_value
    }

    /// Set `key` only if it is absent. Returns whether the write happened.
    pub fn set_item_if_absent(&self, key: &str, value: impl Into<String>) -> bool {
        let mut items = lock_items(&self.items);
        if items.contains_key(key) {
            return false;
        }

        let value = value.into();
        items.insert(key.to_string(), value.clone());
        self.emit(key, None, Some(value));
        true
    }

    /// Remove `key` only if it still holds `expected`. Returns whether the
    /// removal happened.
    pub fn remove_item_if(&self, key: &str, expected: &str) -> bool {
        let mut items = lock_items(&self.items);
        if items.get(key).map(String::as_str) != Some(expected) {
            return false;
        }

        let old_value = items.remove(key);
        self.emit(key, old_value, None);
        true
    }

    /// Subscribe to changes made by other tabs
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            rx: self.events.subscribe(),
            own: self.id,
        }
    }

    // Called with the items lock held so events are ordered like writes
    fn emit(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // No subscribers is fine
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.id,
        });
    }
}

/// Change feed filtered to other tabs' writes
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    own: TabId,
}

impl StorageEvents {
    pub async fn recv(&mut self) -> Result<StorageEvent, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.origin != self.own {
                return Ok(event);
            }
        }
    }
}

fn lock_items(items: &Items) -> MutexGuard<'_, HashMap<String, String>> {
    // The map holds plain strings; a panic mid-insert leaves nothing torn
    items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_items_are_shared_between_tabs() {
        let shared = SharedStorage::new();
        let a = shared.tab();
        let b = shared.tab();

        assert_ne!(a.id(), b.id());

        a.set_item("authLock", "token");
        assert!(b.contains("authLock"));
        assert_eq!(b.get_item("authLock").as_deref(), Some("token"));

        assert_eq!(b.remove_item("authLock").as_deref(), Some("token"));
        assert!(!a.contains("authLock"));
    }

    #[tokio::test]
    async fn test_events_skip_own_writes() {
        let shared = SharedStorage::new();
        let a = shared.tab();
        let b = shared.tab();
        let mut a_events = a.subscribe();

        a.set_item("k", "from a");
        b.set_item("k", "from b");

        let event = a_events.recv().await.unwrap();
        assert_eq!(event.origin, b.id());
        assert_eq!(event.old_value.as_deref(), Some("from a"));
        assert_eq!(event.new_value.as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn test_unchanged_value_is_silent() {
        let shared = SharedStorage::new();
        let a = shared.tab();
        let b = shared.tab();
        let mut events = a.subscribe();

        b.set_item("k", "v");
        b.set_item("k", "v");
        b.remove_item("k");
        b.remove_item("k");

        assert!(!events.recv().await.unwrap().is_removal());
        assert!(events.recv().await.unwrap().is_removal());

        let next = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
        assert!(next.is_err());
    }

    #[test]
    fn test_conditional_writes() {
        let shared = SharedStorage::new();
        let a = shared.tab();
        let b = shared.tab();

        assert!(a.set_item_if_absent("authLock", "a-token"));
        assert!(!b.set_item_if_absent("authLock", "b-token"));
        assert_eq!(b.get_item("authLock").as_deref(), Some("a-token"));

        assert!(!b.remove_item_if("authLock", "b-token"));
        assert!(a.contains("authLock"));
        assert!(a.remove_item_if("authLock", "a-token"));
        assert!(!a.contains("authLock"));
    }

    #[test]
    fn test_from_entries() {
        let shared = SharedStorage::from_entries([("loginRecommendationFlag", "set")]);
        assert_eq!(
            shared.tab().get_item("loginRecommendationFlag").as_deref(),
            Some("set")
        );
    }
}
