//! OAuth token refresh under the cross-tab auth lock
//!
//! Refresh tokens are single use, so only one tab may refresh at a time.
//! The holder reloads the record first: if another tab refreshed while we
//! waited, its token is picked up instead of spending the refresh token
//! again.

use crate::error::SessionResult;
use crate::lock::LockOutcome;
use crate::remote::{RemoteError, RemoteSource};
use crate::session::types::{AuthPatch, SessionPatch};
use crate::session::user::UserSession;
use chrono::Utc;

/// Refresh when the access token expires within this window
pub const TOKEN_REFRESH_MARGIN_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NotLoggedIn,
    /// The current token is good for longer than the margin
    Fresh,
    /// Another tab refreshed while this one waited for the lock
    RefreshedElsewhere,
    Refreshed,
}

/// Make sure the session holds a usable access token.
///
/// The lock is released on every path, including errors.
pub async fn ensure_fresh_token(
    session: &UserSession,
    remote: &dyn RemoteSource,
) -> SessionResult<TokenState> {
    if !session.is_logged_in() {
        return Ok(TokenState::NotLoggedIn);
    }

    let now = Utc::now().timestamp_millis();
    if !session.read(|d| d.auth.expires_within(TOKEN_REFRESH_MARGIN_MS, now)) {
        return Ok(TokenState::Fresh);
    }

    let token_before = session.access_token();
    let outcome = session.lock_auth_data().await;
    if outcome == LockOutcome::TimedOut {
        tracing::warn!(user = %session.name(), "Auth lock taken over after timeout");
    }

    let result = refresh_locked(session, remote, token_before).await;
    session.unlock_auth_data();

    if let Ok(state) = &result {
        tracing::debug!(user = %session.name(), state = ?state, "Token checked");
    }
    result
}

async fn refresh_locked(
    session: &UserSession,
    remote: &dyn RemoteSource,
    token_before: Option<String>,
) -> SessionResult<TokenState> {
    session.reload().await;

    let auth = session.read(|d| d.auth.clone());
    if !auth.is_logged_in {
        return Ok(TokenState::NotLoggedIn);
    }

    let now = Utc::now().timestamp_millis();
    if !auth.expires_within(TOKEN_REFRESH_MARGIN_MS, now) {
        return Ok(if auth.access_token != token_before {
            TokenState::RefreshedElsewhere
        } else {
            TokenState::Fresh
        });
    }

    let refresh_token = auth.refresh_token.ok_or(RemoteError::NotLoggedIn)?;
    let grant = remote.refresh_token(&refresh_token).await?;

    let expires_in_ms = i64::try_from(grant.expires_in)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000);
    let mut patch = AuthPatch::new()
        .access_token(grant.access_token)
        .refresh_token(Some(grant.refresh_token.unwrap_or(refresh_token)))
        .expiration(now.saturating_add(expires_in_ms));
    if !grant.scope.is_empty() {
        patch = patch.scopes(grant.scope);
    }

    session.update(SessionPatch::new().auth(patch)).await?;
    tracing::info!(user = %session.name(), "Access token refreshed");

    Ok(TokenState::Refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockConfig;
    use crate::remote::{Listing, RemoteResult, TokenGrant};
    use crate::session::context::SessionContext;
    use crate::shared::SharedStorage;
    use crate::storage::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct TokenRemote {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for TokenRemote {
        async fn me(&self, _token: &str) -> RemoteResult<Value> {
            Err(RemoteError::Unavailable)
        }
        async fn preferences(&self, _token: &str) -> RemoteResult<Value> {
            Err(RemoteError::Unavailable)
        }
        async fn my_subreddits(&self, _token: &str, _after: Option<&str>) -> RemoteResult<Listing> {
            Err(RemoteError::Unavailable)
        }
        async fn my_multis(&self, _token: &str) -> RemoteResult<Vec<Value>> {
            Err(RemoteError::Unavailable)
        }
        async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<TokenGrant> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(200)).await;
            if refresh_token == "revoked" {
                return Err(RemoteError::Api {
                    status: 400,
                    error: "invalid_grant".into(),
                    message: String::new(),
                });
            }
            Ok(TokenGrant {
                access_token: format!("access-{}", n),
                refresh_token: None,
                expires_in: 3600,
                scope: "read identity".into(),
            })
        }
    }

    fn session_in(store: &Arc<dyn KeyValueStore>, shared: &SharedStorage) -> UserSession {
        let ctx = Arc::new(SessionContext::new(
            Arc::clone(store),
            shared.tab(),
            LockConfig::default(),
        ));
        UserSession::new("alice", ctx)
    }

    async fn expiring_login(session: &UserSession, refresh_token: &str) {
        session
            .update(
                SessionPatch::new().auth(
                    AuthPatch::new()
                        .access_token("stale")
                        .refresh_token(Some(refresh_token.to_string()))
                        .expiration(Utc::now().timestamp_millis())
                        .is_logged_in(true),
                ),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_guest_and_fresh_skip_refresh() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let session = session_in(&store, &SharedStorage::new());
        let remote = TokenRemote::default();

        assert_eq!(
            ensure_fresh_token(&session, &remote).await.unwrap(),
            TokenState::NotLoggedIn
        );

        session
            .update(SessionPatch::new().auth(
                AuthPatch::new()
                    .access_token("tok")
                    .expiration(Utc::now().timestamp_millis() + 3_600_000)
                    .is_logged_in(true),
            ))
            .await
            .unwrap();
        assert_eq!(
            ensure_fresh_token(&session, &remote).await.unwrap(),
            TokenState::Fresh
        );
        assert_eq!(remote.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_refresh_token_and_unlocks() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let shared = SharedStorage::new();
        let session = session_in(&store, &shared);
        expiring_login(&session, "refresh-1").await;

        let state = ensure_fresh_token(&session, &TokenRemote::default()).await.unwrap();

        assert_eq!(state, TokenState::Refreshed);
        let auth = session.data().auth;
        assert_eq!(auth.access_token.as_deref(), Some("access-1"));
        assert_eq!(auth.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(auth.scopes.as_deref(), Some("read identity"));
        assert!(!shared.tab().contains(crate::lock::AUTH_LOCK_KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tabs_refresh_once() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let shared = SharedStorage::new();
        let tab_a = session_in(&store, &shared);
        let tab_b = session_in(&store, &shared);
        expiring_login(&tab_a, "refresh-1").await;
        tab_b.reload().await;
        let remote = TokenRemote::default();

        let (a, b) = tokio::join!(
            ensure_fresh_token(&tab_a, &remote),
            ensure_fresh_token(&tab_b, &remote)
        );

        assert_eq!(a.unwrap(), TokenState::Refreshed);
        assert_eq!(b.unwrap(), TokenState::RefreshedElsewhere);
        assert_eq!(remote.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(tab_b.data().auth.access_token.as_deref(), Some("access-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_still_unlocks() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let shared = SharedStorage::new();
        let session = session_in(&store, &shared);
        expiring_login(&session, "revoked").await;

        assert!(ensure_fresh_token(&session, &TokenRemote::default()).await.is_err());
        assert!(!session.owns_auth_lock());
        assert!(!shared.tab().contains(crate::lock::AUTH_LOCK_KEY));
    }
}
