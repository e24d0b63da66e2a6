//! # photon-session
//!
//! Multi-user session layer for a Reddit client: every account signed in
//! on a device gets its own persisted record, tabs coordinate OAuth token
//! refreshes through a shared lock, and seen posts are tracked across tabs.
//!
//! ## Modules
//!
//! - [`storage`]: JSON key-value record store (SQLite, in-memory fallback)
//! - [`shared`]: tab-shared string storage with change events
//! - [`lock`]: cross-tab auth lock
//! - [`session`]: user sessions, the global record, seen posts, registry
//! - [`remote`]: Reddit API collaborator
//! - [`observer`]: UI roles (unread badge, notices)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photon_session::{Config, RedditClient, SessionRegistry, SharedStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default();
//!     let shared = SharedStorage::new();
//!     let registry = SessionRegistry::open(&config, &shared);
//!
//!     let reddit = RedditClient::new(config.reddit_config())?;
//!     let report = registry.bootstrap(&reddit).await;
//!     println!("Signed in as {}", report.user);
//!
//!     registry.seen_posts().mark_seen("t3_abc123");
//!     registry.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod observer;
pub mod remote;
pub mod session;
pub mod shared;
pub mod storage;
pub mod version;

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};
pub use error::{SessionError, SessionResult};
pub use lock::{AuthLock, LockConfig, LockOutcome, AUTH_LOCK_KEY};
pub use observer::{Notice, NoticeLevel, NoticeSink, Observers, UnreadCountObserver};
pub use remote::{RedditClient, RedditConfig, RemoteError, RemoteResult, RemoteSource};
pub use session::{
    BootstrapReport, GlobalSession, SeenPosts, SessionPatch, SessionRegistry, TokenState,
    UserSession,
};
pub use shared::{SharedStorage, StorageEvent, TabId, TabStorage};
pub use storage::{KeyValueStore, Persistence, StorageError, StorageResult};
pub use version::VersionNumber;
