//! Session registry
//!
//! One registry per tab. It owns the global record, the seen posts, every
//! user session opened in this tab, and knows which of them is current.
//! Sessions reach the shared collaborators (store, tab storage, observers)
//! through the [`SessionContext`] the registry hands them.

use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::lock::LockConfig;
use crate::observer::{NoticeLevel, Observers};
use crate::remote::RemoteSource;
use crate::session::auth::{ensure_fresh_token, TokenState};
use crate::session::context::SessionContext;
use crate::session::global::GlobalSession;
use crate::session::seen::SeenPosts;
use crate::session::types::{
    user_key, GlobalPatch, SessionPatch, GUEST_USER_NAME, TMP_LOGIN_USER_NAME, USER_KEY_PREFIX,
};
use crate::session::user::UserSession;
use crate::shared::{SharedStorage, TabStorage};
use crate::storage::{open_store, KeyValueStore, Persistence};
use crate::version::{VersionNumber, CURRENT_VERSION};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Subreddit offered to users after their first login
pub const LOGIN_SUBREDDIT: &str = "photon_reddit";

const DEFAULT_SEEN_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// How the stored version relates to this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    Unchanged,
    Upgraded { from: VersionNumber, to: VersionNumber },
    Downgraded { from: VersionNumber, to: VersionNumber },
}

/// What happened during [`SessionRegistry::bootstrap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub user: String,
    pub logged_in: bool,
    pub persistence: Persistence,
    /// Set when the in-memory storage warning was shown
    pub storage_warning: bool,
    pub token: Option<TokenState>,
    pub user_data_loaded: bool,
    pub subscribe_prompted: bool,
    pub version: VersionChange,
    pub first_visit: bool,
}

pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    persistence: Persistence,
    global: GlobalSession,
    seen_posts: Arc<SeenPosts>,
    sessions: Mutex<Vec<Arc<UserSession>>>,
    current: RwLock<Option<Arc<UserSession>>>,
    seen_flush_interval: Duration,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Open the configured store for a new tab of `shared`
    pub fn open(config: &Config, shared: &SharedStorage) -> Self {
        let (store, persistence) = open_store(&config.store_config());
        Self::new(store, persistence, shared.tab(), config.lock_config())
            .with_seen_flush_interval(config.seen_flush_interval())
    }

    pub fn new(
        store: Arc<dyn KeyValueStore>,
        persistence: Persistence,
        tab: TabStorage,
        lock_config: LockConfig,
    ) -> Self {
        let ctx = Arc::new(SessionContext::new(Arc::clone(&store), tab, lock_config));

        Self {
            global: GlobalSession::new(Arc::clone(&store)),
            seen_posts: Arc::new(SeenPosts::new(store)),
            ctx,
            persistence,
            sessions: Mutex::new(Vec::new()),
            current: RwLock::new(None),
            seen_flush_interval: DEFAULT_SEEN_FLUSH_INTERVAL,
            flush_task: Mutex::new(None),
        }
    }

    pub fn with_seen_flush_interval(mut self, interval: Duration) -> Self {
        self.seen_flush_interval = interval;
        self
    }

    /// Load the global record and seen posts, then open the last active
    /// user (guest if none) as the current session.
    pub async fn init(&self) -> Arc<UserSession> {
        let global_state = self.global.init().await;
        tracing::debug!(state = ?global_state, "Global record loaded");

        if let Err(e) = self.seen_posts.load().await {
            tracing::warn!(error = %e, "Could not load seen posts");
        }
        self.start_seen_flush();

        let name = self
            .global
            .last_active_user()
            .unwrap_or_else(|| GUEST_USER_NAME.to_string());
        let session = self.user(&name).await;
        self.make_current(&session);

        tracing::info!(user = %session.name(), persistence = ?self.persistence, "Sessions ready");
        session
    }

    /// Page-load sequence: init, storage check, token and user data,
    /// version check, first-visit flag.
    pub async fn bootstrap(&self, remote: &dyn RemoteSource) -> BootstrapReport {
        let session = self.init().await;
        let observers = &self.ctx.observers;

        let mut storage_warning = false;
        if !self.global.data().storage_check_completed {
            if self.persistence == Persistence::InMemoryOnly {
                observers.notify(
                    NoticeLevel::Warning,
                    "Storage is unavailable. Settings and logins will be lost when you leave.",
                );
                storage_warning = true;
            }
            self.update_global(GlobalPatch::new().storage_check_completed(true))
                .await;
        }

        let mut token = None;
        let mut user_data_loaded = false;
        let mut subscribe_prompted = false;
        if session.is_logged_in() {
            match self.load_logged_in(&session, remote).await {
                Ok(state) => {
                    token = Some(state);
                    user_data_loaded = true;
                    subscribe_prompted = self.offer_subscribe_prompt(&session).await;
                }
                Err(e) => {
                    tracing::error!(user = %session.name(), error = %e, "Loading user data failed");
                    observers.notify(
                        NoticeLevel::Error,
                        "Could not load your data. Maybe check redditstatus.com",
                    );
                }
            }
        }

        let version = self.check_version().await;

        let first_visit = self.global.data().is_first_time_visit;
        if first_visit {
            self.update_global(GlobalPatch::new().is_first_time_visit(false))
                .await;
        }

        BootstrapReport {
            user: session.name(),
            logged_in: session.is_logged_in(),
            persistence: self.persistence,
            storage_warning,
            token,
            user_data_loaded,
            subscribe_prompted,
            version,
            first_visit,
        }
    }

    /// The session shown to the user. Guest until [`init`](Self::init) ran.
    pub fn current(&self) -> Arc<UserSession> {
        if let Some(session) = self.read_current() {
            return session;
        }

        let guest = Arc::new(UserSession::new(GUEST_USER_NAME, Arc::clone(&self.ctx)));
        self.track(&guest);
        self.make_current(&guest);
        guest
    }

    /// Session for `name`, opened and loaded on first use
    pub async fn user(&self, name: &str) -> Arc<UserSession> {
        if let Some(session) = self.find(name) {
            // e.g. the guest handed out by `current()` before `init()`
            if !session.is_loaded() {
                session.init().await;
            }
            return session;
        }

        let session = Arc::new(UserSession::new(name, Arc::clone(&self.ctx)));
        let state = session.init().await;
        tracing::debug!(user = %name, state = ?state, "Session loaded");

        // Another caller may have opened it while we were loading
        if let Some(existing) = self.find(name) {
            if !existing.is_loaded() {
                existing.init().await;
            }
            return existing;
        }
        self.track(&session);
        session
    }

    /// Make a stored user (or the guest) current and remember the choice
    pub async fn switch_user(&self, name: &str) -> SessionResult<Arc<UserSession>> {
        let known = name == GUEST_USER_NAME
            || self.find(name).is_some()
            || self.users().await?.iter().any(|user| user == name);
        if !known {
            return Err(SessionError::UnknownUser(name.to_string()));
        }

        let session = self.user(name).await;
        self.make_current(&session);
        self.update_global(GlobalPatch::new().last_active_user(name))
            .await;

        tracing::info!(user = %name, "Switched user");
        Ok(session)
    }

    /// Open the `#login` placeholder for a login in progress and make it
    /// current. The first profile fetch renames it.
    pub async fn login_placeholder(&self) -> Arc<UserSession> {
        let session = self.user(TMP_LOGIN_USER_NAME).await;
        self.make_current(&session);
        self.update_global(GlobalPatch::new().last_active_user(TMP_LOGIN_USER_NAME))
            .await;
        session
    }

    /// Names of all stored users, sorted
    pub async fn users(&self) -> SessionResult<Vec<String>> {
        let keys = self.ctx.store.keys_with_prefix(USER_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(USER_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    pub fn global(&self) -> &GlobalSession {
        &self.global
    }

    pub fn seen_posts(&self) -> &Arc<SeenPosts> {
        &self.seen_posts
    }

    pub fn observers(&self) -> &Observers {
        &self.ctx.observers
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn tab(&self) -> &TabStorage {
        &self.ctx.tab
    }

    /// Stop the flush task, write seen posts and release this tab's locks
    pub async fn teardown(&self) {
        if let Some(task) = lock_recover(&self.flush_task).take() {
            task.abort();
        }

        if let Err(e) = self.seen_posts.save().await {
            tracing::warn!(error = %e, "Final seen posts flush failed");
        }

        for session in lock_recover(&self.sessions).iter() {
            session.teardown();
        }
        tracing::debug!(tab = %self.ctx.tab.id(), "Tab torn down");
    }

    async fn load_logged_in(
        &self,
        session: &UserSession,
        remote: &dyn RemoteSource,
    ) -> SessionResult<TokenState> {
        let state = ensure_fresh_token(session, remote).await?;
        if session.is_placeholder() {
            session.fetch_name(remote, &self.global).await?;
        }
        session.fetch_user_data(remote).await?;
        Ok(state)
    }

    async fn offer_subscribe_prompt(&self, session: &UserSession) -> bool {
        if session.read(|d| d.login_sub_prompt_displayed) {
            return false;
        }

        let prompt = !session.is_subscribed_to(LOGIN_SUBREDDIT);
        if prompt {
            self.ctx.observers.notify(
                NoticeLevel::Info,
                format!("Do you want to subscribe to r/{}?", LOGIN_SUBREDDIT),
            );
        }

        if let Err(e) = session
            .update(SessionPatch::new().login_sub_prompt_displayed(true))
            .await
        {
            tracing::debug!(error = %e, "Prompt flag kept in memory only");
        }
        prompt
    }

    async fn check_version(&self) -> VersionChange {
        let last = VersionNumber::parse(&self.global.data().photon_version);
        let current = VersionNumber::current();

        if last == current {
            return VersionChange::Unchanged;
        }

        let change = if current > last {
            self.ctx.observers.notify(
                NoticeLevel::Info,
                format!("New version installed! ({} → {})", last, current),
            );
            VersionChange::Upgraded { from: last, to: current }
        } else {
            VersionChange::Downgraded { from: last, to: current }
        };

        self.update_global(GlobalPatch::new().photon_version(CURRENT_VERSION))
            .await;
        change
    }

    async fn update_global(&self, patch: GlobalPatch) {
        if let Err(e) = self.global.update(patch).await {
            tracing::warn!(error = %e, "Global record kept in memory only");
        }
    }

    fn start_seen_flush(&self) {
        let mut task = lock_recover(&self.flush_task);
        if task.is_none() {
            *task = Some(self.seen_posts.start_periodic_flush(self.seen_flush_interval));
        }
    }

    fn make_current(&self, session: &Arc<UserSession>) {
        match self.current.write() {
            Ok(mut current) => *current = Some(Arc::clone(session)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(session)),
        }
        self.ctx.set_active(session.id());
        session.refresh_unread_badge();
    }

    fn read_current(&self) -> Option<Arc<UserSession>> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Match on the store key; names follow the profile and may differ
    fn find(&self, name: &str) -> Option<Arc<UserSession>> {
        let key = user_key(name);
        lock_recover(&self.sessions)
            .iter()
            .find(|session| session.key() == key)
            .cloned()
    }

    fn track(&self, session: &Arc<UserSession>) {
        lock_recover(&self.sessions).push(Arc::clone(session));
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
