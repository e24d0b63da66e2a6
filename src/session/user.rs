//! User session
//!
//! One user's record plus the per-session runtime state that is never
//! persisted: the unread inbox set and this session's share of the auth
//! lock.
//!
//! A session starts under a name (`#guest`, `#login` or a real user name)
//! and its record lives under `u/<name>`. The `#login` placeholder is
//! renamed once the first profile fetch reveals the real name.

use crate::error::{SessionError, SessionResult};
use crate::lock::{AuthLock, LockOutcome};
use crate::remote::RemoteSource;
use crate::session::caches;
use crate::session::context::SessionContext;
use crate::session::global::GlobalSession;
use crate::session::inbox::InboxUnreadSet;
use crate::session::record::{LoadState, PersistedRecord};
use crate::session::types::{
    user_key, GlobalPatch, MultiReddit, SessionPatch, StoredData, UserSessionData,
    GUEST_USER_NAME, TMP_LOGIN_USER_NAME,
};
use crate::storage::StorageResult;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Legacy flat key holding `"set"` once the subscribe prompt was shown
const LEGACY_LOGIN_PROMPT_KEY: &str = "loginRecommendationFlag";
/// Legacy flat key holding `StoredData` of subreddit things
const LEGACY_SUBREDDITS_KEY: &str = "subredditsData";
/// Legacy flat key holding `StoredData` of multireddits
const LEGACY_MULTIS_KEY: &str = "multis";

pub struct UserSession {
    id: Uuid,
    name: RwLock<String>,
    record: PersistedRecord<UserSessionData>,
    inbox: InboxUnreadSet,
    auth_lock: AuthLock,
    /// Set once [`init`](Self::init) has read the stored record
    loaded: AtomicBool,
    ctx: Arc<SessionContext>,
}

impl UserSession {
    /// A session with default contents; call [`init`](Self::init) to load it
    pub fn new(name: &str, ctx: Arc<SessionContext>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: RwLock::new(name.to_string()),
            record: PersistedRecord::new(Arc::clone(&ctx.store), user_key(name)),
            inbox: InboxUnreadSet::new(),
            auth_lock: AuthLock::new(ctx.tab.clone(), ctx.lock_config.clone()),
            loaded: AtomicBool::new(false),
            ctx,
        }
    }

    /// Load the record; after a schema upgrade, pull in legacy flat keys
    /// and write the result back.
    pub async fn init(&self) -> LoadState {
        let state = self.record.load().await;

        if self.ctx.store.was_upgraded() {
            self.migrate_legacy_keys().await;
        }

        self.loaded.store(true, Ordering::Release);
        state
    }

    /// False until [`init`](Self::init) ran
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Re-read the record to pick up other tabs' writes
    pub async fn reload(&self) -> LoadState {
        self.record.load().await
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> String {
        self.record.key()
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_guest(&self) -> bool {
        self.name() == GUEST_USER_NAME
    }

    /// True while the record still lives under the login placeholder
    pub fn is_placeholder(&self) -> bool {
        self.key().ends_with(TMP_LOGIN_USER_NAME)
    }

    pub fn display_name(&self) -> String {
        if self.is_guest() {
            "Guest".to_string()
        } else {
            format!("u/{}", self.name())
        }
    }

    /// Copy of the whole record
    pub fn data(&self) -> UserSessionData {
        self.record.snapshot()
    }

    /// Read part of the record
    pub fn read<R>(&self, f: impl FnOnce(&UserSessionData) -> R) -> R {
        self.record.read(f)
    }

    pub fn is_logged_in(&self) -> bool {
        self.record.read(|d| d.auth.is_logged_in)
    }

    /// Merge `patch` into the record and persist it
    pub async fn update(&self, patch: SessionPatch) -> StorageResult<()> {
        self.record.update(|data| patch.apply(data)).await
    }

    /// Move the record from `old_name` to `new_name`.
    ///
    /// Order: repoint `lastActiveUser`, delete the old record, rename and
    /// write the new one. If a step fails the record stays in memory under
    /// the new name; the old stored record is never rewritten.
    pub async fn change_key(
        &self,
        old_name: &str,
        new_name: &str,
        global: &GlobalSession,
    ) -> StorageResult<()> {
        if global.last_active_user().as_deref() == Some(old_name) {
            if let Err(e) = global
                .update(GlobalPatch::new().last_active_user(new_name))
                .await
            {
                tracing::warn!(error = %e, "Could not repoint last active user");
            }
        }

        if let Err(e) = self.record.delete_persisted().await {
            tracing::warn!(key = %self.key(), error = %e, "Could not delete old record");
        }

        self.set_name(new_name);
        self.record.rename(user_key(new_name));

        tracing::info!(from = %old_name, to = %new_name, "Session renamed");
        self.record.persist().await
    }

    /// Fetch the profile and resolve the session name.
    ///
    /// Returns `Ok(false)` when the API answers with an error payload and
    /// `Err` when the request itself failed.
    pub async fn fetch_name(
        &self,
        remote: &dyn RemoteSource,
        global: &GlobalSession,
    ) -> SessionResult<bool> {
        let token = self.access_token().unwrap_or_default();

        let profile = match remote.me(&token).await {
            Ok(profile) => profile,
            Err(e) if e.is_api_error() => {
                tracing::info!(user = %self.name(), error = %e, "Profile fetch rejected");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let new_name = profile
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(GUEST_USER_NAME)
            .to_string();

        if let Err(e) = self.update(SessionPatch::new().user_data(profile)).await {
            tracing::debug!(error = %e, "Profile kept in memory only");
        }

        let old_name = self.name();
        self.set_name(&new_name);

        if self.is_placeholder() {
            if let Err(e) = self.change_key(&old_name, &new_name, global).await {
                tracing::warn!(error = %e, "Renamed session kept in memory only");
            }
            if let Err(e) = global
                .update(GlobalPatch::new().last_active_user(new_name.as_str()))
                .await
            {
                tracing::warn!(error = %e, "Could not store last active user");
            }
        }

        Ok(true)
    }

    /// Load subreddits, multireddits and preferences concurrently
    pub async fn fetch_user_data(&self, remote: &dyn RemoteSource) -> SessionResult<()> {
        let preferences = async {
            match (self.is_logged_in(), self.access_token()) {
                (true, Some(token)) => remote
                    .preferences(&token)
                    .await
                    .map_err(SessionError::from),
                _ => Ok(Value::Object(Default::default())),
            }
        };

        let (_, _, preferences) = tokio::try_join!(
            caches::load_subreddits(self, remote),
            caches::load_multis(self, remote),
            preferences,
        )?;

        if let Err(e) = self
            .update(SessionPatch::new().reddit_preferences(preferences))
            .await
        {
            tracing::debug!(error = %e, "Preferences kept in memory only");
        }

        Ok(())
    }

    /// Cached subreddit names, without fetching
    pub fn subreddits(&self) -> Vec<String> {
        self.record.read(|d| {
            d.caches
                .subs
                .as_ref()
                .map(|subs| caches::subreddit_names(&subs.data))
                .unwrap_or_default()
        })
    }

    /// Cached multireddits, without fetching
    pub fn multireddits(&self) -> Vec<MultiReddit> {
        self.record.read(|d| {
            d.caches
                .multis
                .as_ref()
                .map(|multis| multis.data.clone())
                .unwrap_or_default()
        })
    }

    pub fn is_subscribed_to(&self, subreddit: &str) -> bool {
        self.record.read(|d| {
            d.caches
                .subs
                .as_ref()
                .map(|subs| caches::contains_subreddit(&subs.data, subreddit))
                .unwrap_or(false)
        })
    }

    pub fn feed_info(&self, url: &str) -> Option<StoredData<Value>> {
        self.record.read(|d| d.caches.feed_infos.get(url).cloned())
    }

    // ==================== Inbox ====================

    pub fn set_inbox_id_unread_state(&self, id: &str, is_unread: bool) {
        let count = self.inbox.set_unread(id, is_unread);
        self.update_unread_badge(count);
    }

    pub fn set_inbox_ids_unread_state<S: AsRef<str>>(&self, ids: &[S], is_unread: bool) {
        let count = self.inbox.set_many_unread(ids, is_unread);
        self.update_unread_badge(count);
    }

    pub fn set_all_inbox_ids_as_read(&self) {
        self.inbox.clear();
        self.update_unread_badge(0);
    }

    pub fn inbox_unread_count(&self) -> usize {
        self.inbox.count()
    }

    pub fn is_inbox_id_unread(&self, id: &str) -> bool {
        self.inbox.is_unread(id)
    }

    /// Push the current count to the indicator, if this session is shown
    pub fn refresh_unread_badge(&self) {
        self.update_unread_badge(self.inbox.count());
    }

    fn update_unread_badge(&self, count: usize) {
        if !self.ctx.is_active(self.id) {
            return;
        }
        if let Some(indicator) = self.ctx.observers.unread_indicator() {
            indicator.set_unread_count(count);
        }
    }

    // ==================== Auth lock ====================

    pub async fn lock_auth_data(&self) -> LockOutcome {
        self.auth_lock.acquire().await
    }

    pub fn unlock_auth_data(&self) -> bool {
        self.auth_lock.release()
    }

    pub fn owns_auth_lock(&self) -> bool {
        self.auth_lock.is_owner()
    }

    /// Release everything tied to this tab
    pub fn teardown(&self) {
        self.auth_lock.release_on_teardown();
    }

    pub(crate) fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub(crate) fn access_token(&self) -> Option<String> {
        self.record.read(|d| d.auth.access_token.clone())
    }

    fn set_name(&self, name: &str) {
        match self.name.write() {
            Ok(mut n) => *n = name.to_string(),
            Err(poisoned) => *poisoned.into_inner() = name.to_string(),
        }
    }

    async fn migrate_legacy_keys(&self) {
        let tab = &self.ctx.tab;
        let mut migrated = Vec::new();

        let result = self
            .record
            .update(|data| {
                if let Some(flag) = tab.get_item(LEGACY_LOGIN_PROMPT_KEY) {
                    data.login_sub_prompt_displayed = flag == "set";
                    migrated.push(LEGACY_LOGIN_PROMPT_KEY);
                }

                if let Some(raw) = tab.get_item(LEGACY_SUBREDDITS_KEY) {
                    match serde_json::from_str::<StoredData<Vec<Value>>>(&raw) {
                        Ok(stored) => {
                            let subs = stored
                                .data
                                .into_iter()
                                .map(|thing| thing.get("data").cloned().unwrap_or(thing))
                                .collect();
                            data.caches.subs =
                                Some(StoredData::new(subs, stored.last_updated_ms_utc));
                        }
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed legacy subreddits"),
                    }
                    migrated.push(LEGACY_SUBREDDITS_KEY);
                }

                if let Some(raw) = tab.get_item(LEGACY_MULTIS_KEY) {
                    match serde_json::from_str::<StoredData<Vec<MultiReddit>>>(&raw) {
                        Ok(stored) => data.caches.multis = Some(stored),
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed legacy multireddits"),
                    }
                    migrated.push(LEGACY_MULTIS_KEY);
                }
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Migrated record kept in memory only");
        }

        // Legacy keys belong to one user; the first session to migrate takes them
        for key in &migrated {
            tab.remove_item(key);
        }
        if !migrated.is_empty() {
            tracing::info!(key = %self.key(), migrated = ?migrated, "Migrated legacy keys");
        }
    }
}
