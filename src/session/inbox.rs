//! Unread inbox ids
//!
//! In-memory set of inbox item ids currently unread. Count changes go to
//! the unread indicator through the owning session.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InboxUnreadSet {
    ids: Mutex<HashSet<String>>,
}

impl InboxUnreadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one id. Returns the count afterwards.
    pub fn set_unread(&self, id: &str, is_unread: bool) -> usize {
        let mut ids = self.ids();
        if is_unread {
            ids.insert(id.to_string());
        } else {
            ids.remove(id);
        }
        ids.len()
    }

    /// Mark many ids under one lock. Returns the count afterwards.
    pub fn set_many_unread<S: AsRef<str>>(&self, item_ids: &[S], is_unread: bool) -> usize {
        let mut ids = self.ids();
        for id in item_ids {
            if is_unread {
                ids.insert(id.as_ref().to_string());
            } else {
                ids.remove(id.as_ref());
            }
        }
        ids.len()
    }

    pub fn clear(&self) {
        self.ids().clear();
    }

    pub fn count(&self) -> usize {
        self.ids().len()
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.ids().contains(id)
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
