//! Session layer
//!
//! - [`SessionRegistry`]: one per tab; global record, seen posts, the
//!   current user
//! - [`UserSession`]: one user's persisted record plus inbox and auth lock
//! - [`PersistedRecord`]: in-memory mirror of a stored JSON record with
//!   serialized writes
//!
//! # Example
//!
//! ```no_run
//! use photon_session::config::Config;
//! use photon_session::session::SessionRegistry;
//! use photon_session::shared::SharedStorage;
//!
//! # async fn example() {
//! let shared = SharedStorage::new();
//! let registry = SessionRegistry::open(&Config::default(), &shared);
//! let session = registry.init().await;
//! println!("{}", session.display_name());
//! registry.teardown().await;
//! # }
//! ```

pub mod auth;
pub mod caches;
pub mod context;
pub mod global;
pub mod inbox;
pub mod record;
pub mod registry;
pub mod seen;
pub mod types;
pub mod user;

pub use auth::{ensure_fresh_token, TokenState, TOKEN_REFRESH_MARGIN_MS};
pub use context::SessionContext;
pub use global::GlobalSession;
pub use inbox::InboxUnreadSet;
pub use record::{LoadState, PersistedRecord};
pub use registry::{BootstrapReport, SessionRegistry, VersionChange, LOGIN_SUBREDDIT};
pub use seen::{SeenPosts, SeenPostsMap};
pub use types::{
    AuthData, AuthPatch, CachesPatch, GlobalData, GlobalPatch, MultiReddit, QuickCaches,
    SessionPatch, StoredData, UserSessionData, GUEST_USER_NAME, TMP_LOGIN_USER_NAME,
};
pub use user::UserSession;
