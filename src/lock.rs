//! Cross-tab auth lock
//!
//! Serializes OAuth token refreshes across tabs so two tabs never spend the
//! same refresh token. The lock is a single key in [`TabStorage`] holding the
//! owner's token:
//!
//! ```text
//! acquire:  key absent ──► write own token ──► Uncontended
//!           key present ─► wait for a change ──► retry ──► Released
//!                      └─► timeout ─► overwrite with own token ─► TimedOut
//! release:  remove key only if it still holds our token
//! ```
//!
//! This is advisory. Two tabs that time out at nearly the same moment can
//! both believe they hold the lock, and a lost change notification only
//! costs a timeout. Both are accepted limitations.

use crate::shared::{RecvError, TabStorage};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Shared storage key of the lock flag
pub const AUTH_LOCK_KEY: &str = "authLock";

/// Configuration for the auth lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long to wait for a holder before treating it as dead
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(7500),
        }
    }
}

/// How an acquisition completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Nobody held the lock
    Uncontended,
    /// Another holder released it while we waited
    Released,
    /// The holder never released; the lock was taken over
    TimedOut,
}

/// One participant in the auth lock protocol
pub struct AuthLock {
    storage: TabStorage,
    config: LockConfig,
    /// Token written to the shared key while we own it
    owner_token: Mutex<Option<String>>,
    /// Wakes waiters of this participant; storage events never reach the
    /// tab that caused them
    released: Notify,
}

impl AuthLock {
    pub fn new(storage: TabStorage, config: LockConfig) -> Self {
        Self {
            storage,
            config,
            owner_token: Mutex::new(None),
            released: Notify::new(),
        }
    }

    /// True while this participant owns the lock
    pub fn is_owner(&self) -> bool {
        self.owner().is_some()
    }

    /// True while anyone holds the lock
    pub fn is_held(&self) -> bool {
        self.storage.contains(AUTH_LOCK_KEY)
    }

    /// Acquire the lock, waiting at most the configured timeout.
    ///
    /// Never fails: an unresponsive holder is overridden.
    pub async fn acquire(&self) -> LockOutcome {
        // Subscribe before the first check so a release in between is seen
        let mut events = self.storage.subscribe();
        let deadline = Instant::now() + self.config.timeout;
        let mut waited = false;

        loop {
            let released_here = self.released.notified();
            tokio::pin!(released_here);

            if self.try_acquire() {
                return if waited {
                    tracing::debug!(tab = %self.storage.id(), "Auth lock acquired after release");
                    LockOutcome::Released
                } else {
                    LockOutcome::Uncontended
                };
            }

            if !waited {
                tracing::debug!(tab = %self.storage.id(), "Auth lock held, waiting");
                waited = true;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = &mut released_here => {}
                event = events.recv() => match event {
                    // Any change (or a gap in the feed) means re-check
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        tokio::time::sleep_until(deadline).await;
                        break;
                    }
                },
            }
        }

        self.take_over();
        LockOutcome::TimedOut
    }

    /// Release the lock if we own it. Returns whether we did.
    ///
    /// Calls from a non-owner are ignored.
    pub fn release(&self) -> bool {
        let token = match self.owner().take() {
            Some(token) => token,
            None => {
                tracing::debug!(tab = %self.storage.id(), "Ignoring auth unlock from non-owner");
                return false;
            }
        };

        if !self.storage.remove_item_if(AUTH_LOCK_KEY, &token) {
            tracing::warn!(
                tab = %self.storage.id(),
                "Auth lock was taken over by another tab, leaving its flag in place"
            );
        }

        self.released.notify_waiters();
        true
    }

    /// Release on tab teardown if still the owner
    pub fn release_on_teardown(&self) {
        if self.is_owner() && self.is_held() {
            self.release();
        }
    }

    fn try_acquire(&self) -> bool {
        let mut owner = self.owner();
        let token = Uuid::new_v4().to_string();

        if self.storage.set_item_if_absent(AUTH_LOCK_KEY, token.clone()) {
            *owner = Some(token);
            true
        } else {
            false
        }
    }

    fn take_over(&self) {
        tracing::warn!(
            tab = %self.storage.id(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Auth lock holder unresponsive, taking over"
        );

        let mut owner = self.owner();
        let token = Uuid::new_v4().to_string();
        // Clear and re-take in one write
        self.storage.set_item(AUTH_LOCK_KEY, token.clone());
        *owner = Some(token);
    }

    fn owner(&self) -> MutexGuard<'_, Option<String>> {
        self.owner_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AuthLock {
    fn drop(&mut self) {
        self.release_on_teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedStorage;
    use std::sync::Arc;

    fn lock_pair(timeout_ms: u64) -> (AuthLock, AuthLock) {
        let shared = SharedStorage::new();
        let config = LockConfig {
            timeout: Duration::from_millis(timeout_ms),
        };
        (
            AuthLock::new(shared.tab(), config.clone()),
            AuthLock::new(shared.tab(), config),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncontended_acquire_does_not_wait() {
        let (lock, _other) = lock_pair(7500);
        let start = Instant::now();

        assert_eq!(lock.acquire().await, LockOutcome::Uncontended);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(lock.is_owner());
        assert!(lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_completes_on_release() {
        let (holder, waiter) = lock_pair(7500);
        let holder = Arc::new(holder);

        assert_eq!(holder.acquire().await, LockOutcome::Uncontended);

        let releaser = Arc::clone(&holder);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            releaser.release();
        });

        let start = Instant::now();
        assert_eq!(waiter.acquire().await, LockOutcome::Released);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(7500));
        assert!(waiter.is_owner());
        assert!(!holder.is_owner());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lock_taken_at_timeout() {
        let (holder, waiter) = lock_pair(7500);
        assert_eq!(holder.acquire().await, LockOutcome::Uncontended);

        let start = Instant::now();
        assert_eq!(waiter.acquire().await, LockOutcome::TimedOut);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(7500));
        assert!(elapsed < Duration::from_millis(7505));
        assert!(waiter.is_owner());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_noop() {
        let (holder, other) = lock_pair(7500);
        holder.acquire().await;

        assert!(!other.release());
        assert!(holder.is_held());
        assert!(holder.is_owner());

        assert!(holder.release());
        assert!(!holder.is_held());
        // A second unlock is stale
        assert!(!holder.release());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_owner_does_not_clear_new_holder() {
        let (stale, fresh) = lock_pair(100);
        stale.acquire().await;

        assert_eq!(fresh.acquire().await, LockOutcome::TimedOut);

        // The old owner still thinks it holds the lock
        assert!(stale.release());
        assert!(fresh.is_held());
        assert!(fresh.is_owner());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_tab_waiter_wakes_on_release() {
        let shared = SharedStorage::new();
        let lock = Arc::new(AuthLock::new(shared.tab(), LockConfig::default()));
        lock.acquire().await;

        let releaser = Arc::clone(&lock);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            releaser.release();
        });

        let start = Instant::now();
        assert_eq!(lock.acquire().await, LockOutcome::Released);
        assert!(start.elapsed() < Duration::from_millis(7500));
    }

    #[tokio::test]
    async fn test_drop_releases_owned_lock() {
        let shared = SharedStorage::new();
        let observer = shared.tab();

        {
            let lock = AuthLock::new(shared.tab(), LockConfig::default());
            lock.acquire().await;
            assert!(observer.contains(AUTH_LOCK_KEY));
        }

        assert!(!observer.contains(AUTH_LOCK_KEY));
    }
}
