//! Cache storage backends: in-memory and SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::traits::{CacheStore, CachedEntry};
use crate::http::StoredResponse;

/// In-memory storage. Nothing survives the process; used by tests and
/// ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
  generations: RwLock<HashMap<String, HashMap<String, CachedEntry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn get(&self, generation: &str, identity: &str) -> Result<Option<CachedEntry>> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      generations
        .get(generation)
        .and_then(|entries| entries.get(identity))
        .cloned(),
    )
  }

  async fn put(&self, generation: &str, identity: &str, response: StoredResponse) -> Result<()> {
    let mut generations = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    generations.entry(generation.to_string()).or_default().insert(
      identity.to_string(),
      CachedEntry {
        response,
        stored_at: Utc::now(),
      },
    );

    Ok(())
  }

  async fn delete(&self, generation: &str) -> Result<()> {
    let mut generations = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    generations.remove(generation);
    Ok(())
  }

  async fn list_generations(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(generations.keys().cloned().collect())
  }
}

/// SQLite-backed storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location under the platform data dir.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swrproxy").join("cache.db"))
  }

  /// Run database migrations for cache tables.
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

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Cache generations; one row per named snapshot
CREATE TABLE IF NOT EXISTS generations (
    tag TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response entries, keyed by generation + request identity
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, identity)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

#[async_trait]
impl CacheStore for SqliteStore {
  async fn get(&self, generation: &str, identity: &str) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND identity = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, identity], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers_blob, body, stored_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers_blob)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let stored_at = parse_datetime(&stored_at_str)?;

        Ok(Some(CachedEntry {
          response: StoredResponse {
            status,
            headers,
            body,
          },
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  async fn put(&self, generation: &str, identity: &str, response: StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (tag) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to register generation: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (generation, identity, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![generation, identity, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    Ok(())
  }

  async fn delete(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    conn
      .execute(
        "DELETE FROM entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete entries: {}", e))?;

    conn
      .execute(
        "DELETE FROM generations WHERE tag = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation: {}", e))?;

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT tag FROM generations ORDER BY created_at, tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(tags)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
