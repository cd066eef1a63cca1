//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{CacheKey, CachedResponse};
use crate::http::{Headers, Response};

/// Trait for cache storage backends.
///
/// Stores are named; every entry belongs to exactly one store. Writes to the
/// same key in the same store are last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  fn has_store(&self, name: &str) -> Result<bool>;

  /// All store names, in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Remove a store and every entry in it. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Store a snapshot, creating the store if needed.
  fn put(&self, store: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store several snapshots in one transaction; either all land or none.
  fn put_all(&self, store: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Look a key up in one store.
  fn match_in(&self, store: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Look a key up across all stores, oldest store first.
  fn match_any(&self, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Keys held by a store.
  fn keys(&self, store: &str) -> Result<Vec<CacheKey>>;
}

/// SQLite-based storage for cached responses and the mutation queue.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Private database that disappears with the value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Run a storage call on tokio's blocking pool.
pub(crate) async fn blocking<S, T, F>(storage: &Arc<S>, call: F) -> Result<T>
where
  S: Send + Sync + 'static,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T> + Send + 'static,
{
  let storage = Arc::clone(storage);
  tokio::task::spawn_blocking(move || call(storage.as_ref()))
    .await
    .map_err(|e| eyre!("Storage task failed: {}", e))?
}

/// Schema for cache and queue tables.
const SCHEMA: &str = r#"
-- Named stores; seq preserves creation order for cross-store lookups
CREATE TABLE IF NOT EXISTS cache_stores (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(entry_key);

-- Failed mutations awaiting replay, FIFO by seq
CREATE TABLE IF NOT EXISTS mutation_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_tag TEXT NOT NULL,
    replay_id TEXT NOT NULL UNIQUE,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_mutation_queue_tag ON mutation_queue(queue_tag, seq);
"#;

fn ensure_store(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", name, e))?;
  Ok(())
}

fn write_entry(conn: &Connection, store: &str, key: &CacheKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (store_name, entry_key, url, method, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        key.digest(),
        key.url(),
        key.method(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} {}: {}", key.method(), key.url(), e))?;
  Ok(())
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn into_cached(row: EntryRow) -> Result<CachedResponse> {
  let (store, status, headers, body, cached_at) = row;
  let headers: Headers =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  Ok(CachedResponse {
    response: Response {
      status,
      headers,
      body,
    },
    store,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_store(&conn, name)
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT seq FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up store {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, store: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self.conn()?;
    ensure_store(&conn, store)?;
    write_entry(&conn, store, key, response)
  }

  fn put_all(&self, store: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    for (key, response) in entries {
      write_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn match_in(&self, store: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT store_name, status, headers, body, cached_at FROM cache_entries
         WHERE store_name = ? AND entry_key = ?",
        params![store, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    row.map(into_cached).transpose()
  }

  fn match_any(&self, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT ce.store_name, ce.status, ce.headers, ce.body, ce.cached_at
         FROM cache_entries ce
         INNER JOIN cache_stores cs ON cs.name = ce.store_name
         WHERE ce.entry_key = ?
         ORDER BY cs.seq
         LIMIT 1",
        params![key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    row.map(into_cached).transpose()
  }

  fn keys(&self, store: &str) -> Result<Vec<CacheKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT url, method FROM cache_entries WHERE store_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![store], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(url, method)| {
        let url = url::Url::parse(&url).map_err(|e| eyre!("Stored URL '{}' invalid: {}", url, e))?;
        Ok(CacheKey::new(&url, &method))
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
