//! SQLite-backed record store
//!
//! One row per key with the JSON document as text. The schema version lives
//! in `PRAGMA user_version`; opening an older (or brand new) database bumps
//! it and raises the upgraded flag for this process.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::{KeyValueStore, StoreConfig};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current schema version
pub const SCHEMA_VERSION: i64 = 2;

/// Durable store in a single SQLite file
pub struct SqliteStore {
    /// std::sync::Mutex because rusqlite::Connection is !Sync
    conn: Mutex<Connection>,
    path: PathBuf,
    upgraded: bool,
}

impl SqliteStore {
    /// Create or open the store under `config.data_dir`
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::open_path(&config.db_path())
    }

    /// Open a database at an explicit path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Several tabs (processes) may share the file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let upgraded = version < SCHEMA_VERSION;

        if upgraded {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS records (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;

            tracing::info!(
                from = version,
                to = SCHEMA_VERSION,
                path = ?path,
                "Record store schema upgraded"
            );
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            upgraded,
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire store lock: {}", e)))
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let raw: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT value FROM records WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };

        match raw {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                StorageError::MalformedRecord {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let text = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO records (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, text, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM records WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT key FROM records ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    fn was_upgraded(&self) -> bool {
        self.upgraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_test_store(dir: &Path) -> SqliteStore {
        SqliteStore::open(&StoreConfig::new(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempdir().unwrap();
        let store = open_test_store(dir.path());

        assert_eq!(store.get("u/alice").await.unwrap(), None);

        store.set("u/alice", &json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("u/alice").await.unwrap(), Some(json!({"a": 1})));

        store.set("u/alice", &json!({"a": 2})).await.unwrap();
        assert_eq!(store.get("u/alice").await.unwrap(), Some(json!({"a": 2})));

        store.delete("u/alice").await.unwrap();
        assert_eq!(store.get("u/alice").await.unwrap(), None);

        // Deleting twice is fine
        store.delete("u/alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_flag_only_on_first_open() {
        let dir = tempdir().unwrap();

        {
            let store = open_test_store(dir.path());
            assert!(store.was_upgraded());
            store.set("global", &json!({"lastActiveUser": "bob"})).await.unwrap();
        }

        let store = open_test_store(dir.path());
        assert!(!store.was_upgraded());
        assert_eq!(
            store.get("global").await.unwrap(),
            Some(json!({"lastActiveUser": "bob"}))
        );
    }

    #[tokio::test]
    async fn test_upgrade_from_older_version() {
        let dir = tempdir().unwrap();
        let path = StoreConfig::new(dir.path()).db_path();

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 1").unwrap();
        }

        let store = SqliteStore::open_path(&path).unwrap();
        assert!(store.was_upgraded());
    }

    #[tokio::test]
    async fn test_malformed_value() {
        let dir = tempdir().unwrap();
        let store = open_test_store(dir.path());

        {
            let conn = store.conn().unwrap();
            conn.execute(
                "INSERT INTO records (key, value, updated_at) VALUES ('u/broken', '{not json', 0)",
                [],
            )
            .unwrap();
        }

        let err = store.get("u/broken").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let dir = tempdir().unwrap();
        let store = open_test_store(dir.path());

        store.set("u/bob", &json!({})).await.unwrap();
        store.set("global", &json!({})).await.unwrap();
        store.set("u/alice", &json!({})).await.unwrap();

        let keys = store.keys_with_prefix("u/").await.unwrap();
        assert_eq!(keys, vec!["u/alice".to_string(), "u/bob".to_string()]);
    }
}
