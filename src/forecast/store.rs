//! Blob Storage
//!
//! Key-value blob storage addressed by path-like keys
//! (`training/models/random_forest_3d.json`, `logs/2025-01-01-oneinch_logs.csv`).
//! The pipeline only depends on [`BlobStore`]; [`SqliteBlobStore`] is the
//! local implementation.
//!
//! # Schema Design
//!
//! ```sql
//! CREATE TABLE blobs (
//!     key TEXT PRIMARY KEY,
//!     persisted_at INTEGER NOT NULL,
//!     size_bytes INTEGER NOT NULL,
//!     body BLOB NOT NULL
//! ) WITHOUT ROWID;
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: u32 = 1;

/// Path-keyed blob storage.
pub trait BlobStore: Send + Sync {
    /// Fetch a blob; `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a blob, replacing any previous value.
    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// SQLite-backed blob store.
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match current_version {
            None => {
                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS blobs (
                        key TEXT PRIMARY KEY,
                        persisted_at INTEGER NOT NULL,
                        size_bytes INTEGER NOT NULL,
                        body BLOB NOT NULL
                    ) WITHOUT ROWID;
                "#,
                )?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    [SCHEMA_VERSION],
                )?;
                info!("Created blob store schema v{}", SCHEMA_VERSION);
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!("Blob store schema at v{}", SCHEMA_VERSION);
            }
            Some(v) => {
                warn!(
                    "Blob store schema version mismatch: expected {}, got {}",
                    SCHEMA_VERSION, v
                );
            }
        }

        Ok(())
    }
}

impl BlobStore for SqliteBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock();
        let body = conn
            .query_row("SELECT body FROM blobs WHERE key = ?", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(body)
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blobs (key, persisted_at, size_bytes, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                persisted_at = excluded.persisted_at,
                size_bytes = excluded.size_bytes,
                body = excluded.body",
            params![key, Utc::now().timestamp_millis(), body.len() as i64, body],
        )?;
        debug!("Stored {} ({} bytes)", key, body.len());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM blobs WHERE substr(key, 1, ?1) = ?2 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix.chars().count() as i64, prefix], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// Errors from blob storage.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// The database stayed locked past the busy timeout.
    Timeout(String),
}

impl StoreError {
    /// Transient failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Timeout(msg) => write!(f, "Store timed out: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Timeout(e.to_string())
            }
            _ => Self::Sqlite(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let store = SqliteBlobStore::in_memory().unwrap();
        store.put("training/models/a.json", b"{}").unwrap();
        assert_eq!(
            store.get("training/models/a.json").unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites() {
        let store = SqliteBlobStore::in_memory().unwrap();
        store.put("k", b"one").unwrap();
        store.put("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_list_by_prefix_sorted() {
        let store = SqliteBlobStore::in_memory().unwrap();
        store.put("training/models/walk_forward/day_002_x.json", b"b").unwrap();
        store.put("training/models/walk_forward/day_001_x.json", b"a").unwrap();
        store.put("training/models/random_forest.json", b"c").unwrap();
        store.put("training%/odd", b"d").unwrap();

        let keys = store.list("training/models/walk_forward/").unwrap();
        assert_eq!(
            keys,
            vec![
                "training/models/walk_forward/day_001_x.json".to_string(),
                "training/models/walk_forward/day_002_x.json".to_string(),
            ]
        );
        // Prefix match is literal, not a LIKE pattern
        assert_eq!(store.list("training%").unwrap(), vec!["training%/odd".to_string()]);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.db");
        {
            let store = SqliteBlobStore::new(&path, Duration::from_secs(1)).unwrap();
            store.put("k", b"v").unwrap();
        }
        let store = SqliteBlobStore::new(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
