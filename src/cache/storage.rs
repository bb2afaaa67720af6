//! Cache storage trait and SQLite implementation.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Failure of the durable cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
  #[error("failed to open cache database at {path}: {message}")]
  Open { path: String, message: String },

  #[error("cache read failed: {0}")]
  Read(String),

  #[error("cache write failed: {0}")]
  Write(String),

  #[error("cache entry could not be encoded or decoded: {0}")]
  Codec(String),
}

/// Key-value primitive behind the durable cache: a single logical object
/// store holding opaque payloads.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Get the payload stored under `key`.
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

  /// Insert or overwrite the payload under `key`.
  async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

  /// Delete `key`. Deleting a missing key is not an error.
  async fn delete(&self, key: &str) -> Result<(), StorageError>;

  /// All keys currently stored.
  async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

#[async_trait]
impl CacheStorage for NoopStorage {
  async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    Ok(None) // Always miss
  }

  async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
    Ok(()) // Discard
  }

  async fn delete(&self, _key: &str) -> Result<(), StorageError> {
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(Vec::new())
  }
}

/// Schema version recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-based cache storage.
///
/// The connection is opened on first use and shared afterwards; callers
/// racing on the first operation all wait for the same open.
pub struct SqliteStorage {
  path: PathBuf,
  conn: OnceCell<Mutex<Connection>>,
  opens: AtomicUsize,
}

impl SqliteStorage {
  /// Create a storage backed by the database file at `path`. Nothing is
  /// opened until the first operation.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      conn: OnceCell::new(),
      opens: AtomicUsize::new(0),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// How many times the database has actually been opened.
  pub fn open_count(&self) -> usize {
    self.opens.load(Ordering::SeqCst)
  }

  async fn conn(&self) -> Result<&Mutex<Connection>, StorageError> {
    self
      .conn
      .get_or_try_init(|| async { self.open_connection().map(Mutex::new) })
      .await
  }

  fn open_connection(&self) -> Result<Connection, StorageError> {
    let open_err = |message: String| StorageError::Open {
      path: self.path.display().to_string(),
      message,
    };

    // Ensure parent directory exists
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| open_err(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(&self.path).map_err(|e| open_err(e.to_string()))?;
    run_migrations(&conn).map_err(|e| open_err(format!("migration failed: {}", e)))?;

    self.opens.fetch_add(1, Ordering::SeqCst);
    info!(path = %self.path.display(), "opened cache database");
    Ok(conn)
  }
}

/// Bring the schema up to `SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if version < SCHEMA_VERSION {
    debug!(from = version, to = SCHEMA_VERSION, "migrating cache schema");
    conn.execute_batch(CACHE_SCHEMA)?;
    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
  }
  Ok(())
}

/// Lock the connection, reporting poisoning as the caller's kind of failure.
fn lock(
  conn: &Mutex<Connection>,
  err: fn(String) -> StorageError,
) -> Result<MutexGuard<'_, Connection>, StorageError> {
  conn
    .lock()
    .map_err(|e| err(format!("lock poisoned: {}", e)))
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    let conn = self.conn().await?;
    let conn = lock(conn, StorageError::Read)?;

    conn
      .query_row(
        "SELECT payload FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| StorageError::Read(e.to_string()))
  }

  async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
    let conn = self.conn().await?;
    let conn = lock(conn, StorageError::Write)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, payload, stored_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| StorageError::Write(e.to_string()))?;

    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn().await?;
    let conn = lock(conn, StorageError::Write)?;

    conn
      .execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])
      .map_err(|e| StorageError::Write(e.to_string()))?;

    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.conn().await?;
    let conn = lock(conn, StorageError::Read)?;

    let mut stmt = conn
      .prepare("SELECT cache_key FROM cache_entries ORDER BY cache_key")
      .map_err(|e| StorageError::Read(e.to_string()))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| StorageError::Read(e.to_string()))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| StorageError::Read(e.to_string()))?;

    Ok(keys)
  }
}

/// Storage selected by configuration.
pub enum AppStorage {
  Sqlite(SqliteStorage),
  Disabled(NoopStorage),
}

#[async_trait]
impl CacheStorage for AppStorage {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    match self {
      Self::Sqlite(s) => s.get(key).await,
      Self::Disabled(s) => s.get(key).await,
    }
  }

  async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
    match self {
      Self::Sqlite(s) => s.put(key, value).await,
      Self::Disabled(s) => s.put(key, value).await,
    }
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    match self {
      Self::Sqlite(s) => s.delete(key).await,
      Self::Disabled(s) => s.delete(key).await,
    }
  }

  async fn keys(&self) -> Result<Vec<String>, StorageError> {
    match self {
      Self::Sqlite(s) => s.keys().await,
      Self::Disabled(s) => s.keys().await,
    }
  }
}
