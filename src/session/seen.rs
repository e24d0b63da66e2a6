//! Seen posts
//!
//! Maps post full names to the epoch second they were first seen. The map
//! is shared by every tab through the store; each flush first merges the
//! stored copy (other tabs may have seen posts since) and then writes the
//! union back. Merging only adds keys, so timestamps never move.

use crate::session::types::SEEN_POSTS_KEY;
use crate::storage::{KeyValueStore, StorageError, StorageResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::interval;

/// Post full name → epoch seconds
pub type SeenPostsMap = HashMap<String, i64>;

pub struct SeenPosts {
    store: Arc<dyn KeyValueStore>,
    posts: Mutex<SeenPostsMap>,
}

impl SeenPosts {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            posts: Mutex::new(HashMap::new()),
        }
    }

    /// Merge the stored map into this one. Local entries and their
    /// timestamps win. A malformed stored copy is replaced with ours
    /// (`{}` when nothing was marked yet).
    pub async fn load(&self) -> StorageResult<()> {
        match self.read_stored().await {
            Ok(stored) => {
                self.merge_external(stored);
                Ok(())
            }
            Err(StorageError::MalformedRecord { reason, .. }) => {
                tracing::warn!(error = %reason, "Malformed seen posts, replacing stored copy");
                let value = serde_json::to_value(&*self.posts())?;
                self.store.set(SEEN_POSTS_KEY, &value).await
            }
            Err(e) => Err(e),
        }
    }

    /// Merge the stored copy, then write the union back
    pub async fn save(&self) -> StorageResult<()> {
        match self.read_stored().await {
            Ok(stored) => {
                self.merge_external(stored);
            }
            // Ours wins over a broken copy
            Err(StorageError::MalformedRecord { .. }) => {}
            Err(e) => return Err(e),
        }

        let value = serde_json::to_value(&*self.posts())?;
        self.store.set(SEEN_POSTS_KEY, &value).await
    }

    /// Mark a post as seen now
    pub fn mark_seen(&self, full_name: &str) {
        self.mark_seen_at(full_name, Utc::now().timestamp());
    }

    /// Mark a post as seen at `seen_at` (epoch seconds). An existing entry
    /// keeps its first-seen time.
    pub fn mark_seen_at(&self, full_name: &str, seen_at: i64) {
        self.posts().entry(full_name.to_string()).or_insert(seen_at);
    }

    pub fn unmark_seen(&self, full_name: &str) {
        self.posts().remove(full_name);
    }

    /// Unmark a post here and in the stored copy, so the next merge does
    /// not bring it back
    pub async fn forget(&self, full_name: &str) -> StorageResult<()> {
        let mut stored = match self.read_stored().await {
            Ok(stored) => stored,
            Err(StorageError::MalformedRecord { .. }) => HashMap::new(),
            Err(e) => return Err(e),
        };
        stored.remove(full_name);

        self.unmark_seen(full_name);
        self.merge_external(stored);

        let value = serde_json::to_value(&*self.posts())?;
        self.store.set(SEEN_POSTS_KEY, &value).await
    }

    pub fn has_been_seen(&self, full_name: &str) -> bool {
        self.posts().contains_key(full_name)
    }

    /// When a post was first seen
    pub fn seen_at(&self, full_name: &str) -> Option<i64> {
        self.posts().get(full_name).copied()
    }

    /// Forget every seen post, here and in the store
    pub async fn clear(&self) -> StorageResult<()> {
        self.posts().clear();
        self.store
            .set(SEEN_POSTS_KEY, &serde_json::json!({}))
            .await
    }

    /// Add entries from an externally loaded map that are absent locally.
    /// Returns how many were added.
    pub fn merge_external(&self, external: SeenPostsMap) -> usize {
        let mut posts = self.posts();
        let before = posts.len();
        for (name, seen_at) in external {
            posts.entry(name).or_insert(seen_at);
        }
        posts.len() - before
    }

    pub fn len(&self) -> usize {
        self.posts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts().is_empty()
    }

    pub fn snapshot(&self) -> SeenPostsMap {
        self.posts().clone()
    }

    /// Start background flush task.
    ///
    /// Failures are logged and retried on the next tick.
    pub fn start_periodic_flush(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let seen = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);

            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if let Err(e) = seen.save().await {
                    tracing::error!(error = %e, "Seen posts flush failed");
                } else {
                    tracing::debug!(count = seen.len(), "Seen posts flushed");
                }
            }
        })
    }

    async fn read_stored(&self) -> StorageResult<SeenPostsMap> {
        match self.store.get(SEEN_POSTS_KEY).await? {
            None => Ok(HashMap::new()),
            Some(value) => {
                serde_json::from_value(value).map_err(|e| StorageError::MalformedRecord {
                    key: SEEN_POSTS_KEY.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn posts(&self) -> MutexGuard<'_, SeenPostsMap> {
        self.posts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn new_seen() -> (SeenPosts, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (SeenPosts::new(Arc::clone(&store)), store)
    }

    #[test]
    fn test_mark_keeps_first_time() {
        let (seen, _store) = new_seen();

        seen.mark_seen_at("t3_a", 100);
        seen.mark_seen_at("t3_a", 50);
        seen.mark_seen_at("t3_a", 200);

        assert_eq!(seen.seen_at("t3_a"), Some(100));
    }

    #[test]
    fn test_merge_is_monotonic() {
        let (seen, _store) = new_seen();
        seen.mark_seen_at("t3_a", 100);
        seen.mark_seen_at("t3_b", 300);

        let external: SeenPostsMap = [
            ("t3_a".to_string(), 10),
            ("t3_b".to_string(), 900),
            ("t3_c".to_string(), 500),
        ]
        .into_iter()
        .collect();

        assert_eq!(seen.merge_external(external), 1);
        assert_eq!(seen.seen_at("t3_a"), Some(100));
        assert_eq!(seen.seen_at("t3_b"), Some(300));
        assert_eq!(seen.seen_at("t3_c"), Some(500));
    }

    #[tokio::test]
    async fn test_save_merges_other_tabs() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tab_a = SeenPosts::new(Arc::clone(&store));
        let tab_b = SeenPosts::new(Arc::clone(&store));

        tab_a.mark_seen_at("t3_a", 1);
        tab_a.save().await.unwrap();

        tab_b.mark_seen_at("t3_b", 2);
        tab_b.save().await.unwrap();

        assert!(tab_b.has_been_seen("t3_a"));
        let stored = store.get(SEEN_POSTS_KEY).await.unwrap().unwrap();
        assert_eq!(stored, json!({"t3_a": 1, "t3_b": 2}));
    }

    #[tokio::test]
    async fn test_unmark_vs_forget() {
        let (seen, store) = new_seen();
        seen.mark_seen_at("t3_a", 1);
        seen.mark_seen_at("t3_b", 2);
        seen.save().await.unwrap();

        // A plain unmark is undone by the next merge
        seen.unmark_seen("t3_a");
        seen.save().await.unwrap();
        assert!(seen.has_been_seen("t3_a"));

        seen.forget("t3_a").await.unwrap();
        seen.save().await.unwrap();
        assert!(!seen.has_been_seen("t3_a"));
        assert_eq!(store.get(SEEN_POSTS_KEY).await.unwrap(), Some(json!({"t3_b": 2})));
    }

    #[tokio::test]
    async fn test_malformed_store_resets() {
        let (seen, store) = new_seen();
        store.set(SEEN_POSTS_KEY, &json!("garbage")).await.unwrap();

        seen.load().await.unwrap();

        assert!(seen.is_empty());
        assert_eq!(store.get(SEEN_POSTS_KEY).await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn test_load_keeps_local_entries() {
        let (seen, store) = new_seen();
        seen.mark_seen_at("t3_b", 10);
        seen.mark_seen_at("t3_unsaved", 42);
        store
            .set(SEEN_POSTS_KEY, &json!({"t3_b": 99, "t3_c": 5}))
            .await
            .unwrap();

        seen.load().await.unwrap();

        assert_eq!(seen.seen_at("t3_b"), Some(10));
        assert_eq!(seen.seen_at("t3_unsaved"), Some(42));
        assert_eq!(seen.seen_at("t3_c"), Some(5));
    }

    #[tokio::test]
    async fn test_malformed_store_keeps_local_marks() {
        let (seen, store) = new_seen();
        seen.mark_seen_at("t3_a", 3);
        store.set(SEEN_POSTS_KEY, &json!([1, 2])).await.unwrap();

        seen.load().await.unwrap();

        assert!(seen.has_been_seen("t3_a"));
        assert_eq!(store.get(SEEN_POSTS_KEY).await.unwrap(), Some(json!({"t3_a": 3})));
    }

    #[tokio::test]
    async fn test_clear_persists_empty_map() {
        let (seen, store) = new_seen();
        seen.mark_seen("t3_a");
        seen.save().await.unwrap();

        seen.clear().await.unwrap();

        assert!(!seen.has_been_seen("t3_a"));
        assert_eq!(store.get(SEEN_POSTS_KEY).await.unwrap(), Some(json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let seen = Arc::new(SeenPosts::new(Arc::clone(&store)));
        let handle = seen.start_periodic_flush(Duration::from_secs(30));

        seen.mark_seen_at("t3_a", 7);
        assert_eq!(store.get(SEEN_POSTS_KEY).await.unwrap(), None);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            store.get(SEEN_POSTS_KEY).await.unwrap(),
            Some(json!({"t3_a": 7}))
        );

        handle.abort();
    }
}
