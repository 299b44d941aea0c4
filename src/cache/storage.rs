//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::generation::GenerationState;
use super::traits::StoredResponse;

/// Metadata for one named cache store.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
  pub name: String,
  pub state: GenerationState,
  pub installed_at: DateTime<Utc>,
  pub entry_count: usize,
}

/// Summary of one stored entry, without the body.
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub key: String,
  pub status: u16,
  pub size: usize,
  pub digest: String,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores. Each store maps a request key
/// to a stored response.
pub trait CacheStorage: Send + Sync {
  /// Create (or replace) the store `name` holding exactly `entries`, in the
  /// `Installed` state. Either every entry is written or nothing is.
  fn put_generation(&self, name: &str, entries: &[(String, StoredResponse)]) -> Result<()>;

  /// Exact-key lookup in one store.
  fn match_request(&self, name: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Names of every store, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Remove a store and its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Metadata for one store.
  fn generation(&self, name: &str) -> Result<Option<GenerationRecord>>;

  /// Metadata for every store, oldest first.
  fn generations(&self) -> Result<Vec<GenerationRecord>>;

  /// Name of the store currently marked active, if any.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Mark `name` active. Any previously active store becomes superseded.
  fn mark_active(&self, name: &str) -> Result<()>;

  /// Entries of one store in manifest order.
  fn entries(&self, name: &str) -> Result<Vec<EntrySummary>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const CACHE_SCHEMA: &str = r#"
-- One row per cache generation
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    installed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by absolute request URL
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store_name, position);
"#;

impl CacheStorage for SqliteStorage {
  fn put_generation(&self, name: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Rolled back on drop unless committed
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to clear store {}: {}", name, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_stores (name, state, installed_at)
       VALUES (?, ?, datetime('now'))",
      params![name, GenerationState::Installed.as_str()],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", name, e))?;

    for (position, (key, response)) in entries.iter().enumerate() {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (store_name, request_key, position, status, headers, body, digest, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          key,
          position as i64,
          i64::from(response.status),
          headers,
          response.body,
          response.digest()
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit store {}: {}", name, e))?;

    Ok(())
  }

  fn match_request(&self, name: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(i64, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM cache_entries
         WHERE store_name = ? AND request_key = ?",
        params![name, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, name, e))?;

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        Ok(Some(StoredResponse::new(status as u16, headers, body)))
      }
      None => Ok(None),
    }
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.generations()?.into_iter().map(|g| g.name).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit delete of {}: {}", name, e))?;

    Ok(removed > 0)
  }

  fn generation(&self, name: &str) -> Result<Option<GenerationRecord>> {
    Ok(self.generations()?.into_iter().find(|g| g.name == name))
  }

  fn generations(&self) -> Result<Vec<GenerationRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT s.name, s.state, s.installed_at,
                (SELECT COUNT(*) FROM cache_entries e WHERE e.store_name = s.name)
         FROM cache_stores s
         ORDER BY s.installed_at, s.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String, i64)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query cache stores: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read cache stores: {}", e))?;

    rows
      .into_iter()
      .map(|(name, state, installed_at, entry_count)| {
        Ok(GenerationRecord {
          name,
          state: state.parse()?,
          installed_at: parse_datetime(&installed_at)?,
          entry_count: entry_count as usize,
        })
      })
      .collect()
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT name FROM cache_stores WHERE state = ? LIMIT 1",
        params![GenerationState::Active.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query active store: {}", e))
  }

  fn mark_active(&self, name: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "UPDATE cache_stores SET state = ? WHERE state = ? AND name != ?",
      params![
        GenerationState::Superseded.as_str(),
        GenerationState::Active.as_str(),
        name
      ],
    )
    .map_err(|e| eyre!("Failed to supersede active store: {}", e))?;

    let updated = tx
      .execute(
        "UPDATE cache_stores SET state = ? WHERE name = ?",
        params![GenerationState::Active.as_str(), name],
      )
      .map_err(|e| eyre!("Failed to activate store {}: {}", name, e))?;

    if updated == 0 {
      return Err(eyre!("Cache store {} does not exist", name));
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit activation of {}: {}", name, e))?;

    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<EntrySummary>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT request_key, status, LENGTH(body), digest, cached_at FROM cache_entries
         WHERE store_name = ?
         ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<(String, i64, i64, String, String)> = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entries: {}", e))?;

    rows
      .into_iter()
      .map(|(key, status, size, digest, cached_at)| {
        Ok(EntrySummary {
          key,
          status: status as u16,
          size: size as usize,
          digest,
          cached_at: parse_datetime(&cached_at)?,
        })
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
