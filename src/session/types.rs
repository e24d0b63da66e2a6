//! Session record shapes
//!
//! - `UserSessionData`: one user's persisted blob (`u/<name>`)
//! - `GlobalData`: the process-wide record (`global`)
//! - `StoredData`: a cached value with its fetch time
//! - `SessionPatch` / `GlobalPatch`: typed partial updates that merge into
//!   a record instead of replacing it
//!
//! Records are stored as camelCase JSON. Missing fields fall back to their
//! defaults so older records keep loading.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Store key prefix for user records
pub const USER_KEY_PREFIX: &str = "u/";
/// Store key of the global record
pub const GLOBAL_KEY: &str = "global";
/// Store key of the seen-posts map
pub const SEEN_POSTS_KEY: &str = "seenPosts";
/// Name of the logged-out session
pub const GUEST_USER_NAME: &str = "#guest";
/// Name used between a successful login and the first profile fetch
pub const TMP_LOGIN_USER_NAME: &str = "#login";

/// Store key for a user name
pub fn user_key(name: &str) -> String {
    format!("{}{}", USER_KEY_PREFIX, name)
}

/// A cached value and when it was fetched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredData<T> {
    pub data: T,
    /// Fetch time in epoch milliseconds
    #[serde(rename = "lastUpdatedMsUTC")]
    pub last_updated_ms_utc: i64,
}

impl<T> StoredData<T> {
    pub fn new(data: T, last_updated_ms_utc: i64) -> Self {
        Self {
            data,
            last_updated_ms_utc,
        }
    }

    /// True if younger than `max_age_ms` at `now_ms`
    pub fn is_fresh(&self, max_age_ms: i64, now_ms: i64) -> bool {
        now_ms - self.last_updated_ms_utc <= max_age_ms
    }
}

/// OAuth and login state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Access token expiry in epoch milliseconds
    pub expiration: Option<i64>,
    pub scopes: Option<String>,
    /// Epoch milliseconds of the last login
    pub login_time: Option<i64>,
    pub is_logged_in: bool,
}

impl AuthData {
    /// True if the access token expires within `margin_ms` of `now_ms`
    pub fn expires_within(&self, margin_ms: i64, now_ms: i64) -> bool {
        match self.expiration {
            Some(expiration) => expiration - now_ms <= margin_ms,
            None => true,
        }
    }
}

/// Name and path of a multireddit
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiReddit {
    pub display_name: String,
    pub path: String,
}

/// Quick caches kept inside the user record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickCaches {
    /// Subscribed subreddits (subreddit `data` objects, sorted)
    pub subs: Option<StoredData<Vec<Value>>>,
    pub multis: Option<StoredData<Vec<MultiReddit>>>,
    /// Feed header info by feed URL
    pub feed_infos: BTreeMap<String, StoredData<Value>>,
}

/// One user's persisted record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSessionData {
    pub auth: AuthData,
    pub caches: QuickCaches,
    /// Whether the post-login subscribe prompt was already offered
    pub login_sub_prompt_displayed: bool,
    /// reddit.com preferences
    pub reddit_preferences: Option<Value>,
    /// Raw `/api/v1/me` profile
    pub user_data: Option<Value>,
}

/// Process-wide record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalData {
    pub last_active_user: Option<String>,
    pub is_first_time_visit: bool,
    /// Version that last ran against this store
    pub photon_version: String,
    /// The one-time persistence check already ran
    pub storage_check_completed: bool,
    pub feature_flags: BTreeMap<String, bool>,
}

impl Default for GlobalData {
    fn default() -> Self {
        Self {
            last_active_user: None,
            is_first_time_visit: true,
            photon_version: "0.0.0".to_string(),
            storage_check_completed: false,
            feature_flags: BTreeMap::new(),
        }
    }
}

// ============================================
// Partial updates
// ============================================

/// Partial update of [`AuthData`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthPatch {
    pub access_token: Option<Option<String>>,
    pub refresh_token: Option<Option<String>>,
    pub expiration: Option<Option<i64>>,
    pub scopes: Option<Option<String>>,
    pub login_time: Option<Option<i64>>,
    pub is_logged_in: Option<bool>,
}

impl AuthPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that wipes all auth state
    pub fn logged_out() -> Self {
        Self {
            access_token: Some(None),
            refresh_token: Some(None),
            expiration: Some(None),
            scopes: Some(None),
            login_time: Some(None),
            is_logged_in: Some(false),
        }
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(Some(token.into()));
        self
    }

    pub fn refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = Some(token);
        self
    }

    pub fn expiration(mut self, expiration_ms: i64) -> Self {
        self.expiration = Some(Some(expiration_ms));
        self
    }

    pub fn scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = Some(Some(scopes.into()));
        self
    }

    pub fn login_time(mut self, login_time_ms: i64) -> Self {
        self.login_time = Some(Some(login_time_ms));
        self
    }

    pub fn is_logged_in(mut self, is_logged_in: bool) -> Self {
        self.is_logged_in = Some(is_logged_in);
        self
    }

    pub fn apply(self, auth: &mut AuthData) {
        if let Some(v) = self.access_token {
            auth.access_token = v;
        }
        if let Some(v) = self.refresh_token {
            auth.refresh_token = v;
        }
        if let Some(v) = self.expiration {
            auth.expiration = v;
        }
        if let Some(v) = self.scopes {
            auth.scopes = v;
        }
        if let Some(v) = self.login_time {
            auth.login_time = v;
        }
        if let Some(v) = self.is_logged_in {
            auth.is_logged_in = v;
        }
    }
}

/// Partial update of [`QuickCaches`]. Feed infos merge per URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachesPatch {
    pub subs: Option<Option<StoredData<Vec<Value>>>>,
    pub multis: Option<Option<StoredData<Vec<MultiReddit>>>>,
    /// `Some` inserts or replaces, `None` removes
    pub feed_infos: BTreeMap<String, Option<StoredData<Value>>>,
}

impl CachesPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subs(mut self, subs: Option<StoredData<Vec<Value>>>) -> Self {
        self.subs = Some(subs);
        self
    }

    pub fn multis(mut self, multis: Option<StoredData<Vec<MultiReddit>>>) -> Self {
        self.multis = Some(multis);
        self
    }

    pub fn feed_info(mut self, url: impl Into<String>, info: StoredData<Value>) -> Self {
        self.feed_infos.insert(url.into(), Some(info));
        self
    }

    pub fn remove_feed_info(mut self, url: impl Into<String>) -> Self {
        self.feed_infos.insert(url.into(), None);
        self
    }

    pub fn apply(self, caches: &mut QuickCaches) {
        if let Some(v) = self.subs {
            caches.subs = v;
        }
        if let Some(v) = self.multis {
            caches.multis = v;
        }
        for (url, info) in self.feed_infos {
            match info {
                Some(info) => {
                    caches.feed_infos.insert(url, info);
                }
                None => {
                    caches.feed_infos.remove(&url);
                }
            }
        }
    }
}

/// Partial update of a [`UserSessionData`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub auth: Option<AuthPatch>,
    pub caches: Option<CachesPatch>,
    pub login_sub_prompt_displayed: Option<bool>,
    pub reddit_preferences: Option<Value>,
    pub user_data: Option<Value>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth(mut self, auth: AuthPatch) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn caches(mut self, caches: CachesPatch) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn login_sub_prompt_displayed(mut self, displayed: bool) -> Self {
        self.login_sub_prompt_displayed = Some(displayed);
        self
    }

    pub fn reddit_preferences(mut self, preferences: Value) -> Self {
        self.reddit_preferences = Some(preferences);
        self
    }

    pub fn user_data(mut self, user_data: Value) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn apply(self, data: &mut UserSessionData) {
        if let Some(auth) = self.auth {
            auth.apply(&mut data.auth);
        }
        if let Some(caches) = self.caches {
            caches.apply(&mut data.caches);
        }
        if let Some(v) = self.login_sub_prompt_displayed {
            data.login_sub_prompt_displayed = v;
        }
        if let Some(v) = self.reddit_preferences {
            data.reddit_preferences = Some(v);
        }
        if let Some(v) = self.user_data {
            data.user_data = Some(v);
        }
    }
}

/// Partial update of [`GlobalData`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalPatch {
    pub last_active_user: Option<Option<String>>,
    pub is_first_time_visit: Option<bool>,
    pub photon_version: Option<String>,
    pub storage_check_completed: Option<bool>,
    pub feature_flags: BTreeMap<String, bool>,
}

impl GlobalPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_active_user(mut self, name: impl Into<String>) -> Self {
        self.last_active_user = Some(Some(name.into()));
        self
    }

    pub fn is_first_time_visit(mut self, first: bool) -> Self {
        self.is_first_time_visit = Some(first);
        self
    }

    pub fn photon_version(mut self, version: impl Into<String>) -> Self {
        self.photon_version = Some(version.into());
        self
    }

    pub fn storage_check_completed(mut self, completed: bool) -> Self {
        self.storage_check_completed = Some(completed);
        self
    }

    pub fn feature_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.feature_flags.insert(name.into(), enabled);
        self
    }

    pub fn apply(self, data: &mut GlobalData) {
        if let Some(v) = self.last_active_user {
            data.last_active_user = v;
        }
        if let Some(v) = self.is_first_time_visit {
            data.is_first_time_visit = v;
        }
        if let Some(v) = self.photon_version {
            data.photon_version = v;
        }
        if let Some(v) = self.storage_check_completed {
            data.storage_check_completed = v;
        }
        data.feature_flags.extend(self.feature_flags);
    }
}
