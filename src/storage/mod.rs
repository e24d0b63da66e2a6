//! Persistent record store
//!
//! - **store**: the [`KeyValueStore`] contract and `open_store`
//! - **sqlite**: durable SQLite implementation
//! - **memory**: in-memory implementation (tests, degraded mode)
//! - **error**: error types
//!
//! # Example
//!
//! ```rust,no_run
//! use photon_session::storage::{open_store, StoreConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (store, _persistence) = open_store(&StoreConfig::new("./data"));
//!
//!     store.set("u/alice", &json!({"loginSubPromptDisplayed": true})).await?;
//!     let record = store.get("u/alice").await?;
//!     assert!(record.is_some());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};
pub use store::{open_store, KeyValueStore, Persistence, StoreConfig};
