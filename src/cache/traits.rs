//! Storage trait for the generation-scoped cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::StoredResponse;

/// A cache entry read back from storage.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: StoredResponse,
  /// When the entry was last written.
  pub stored_at: DateTime<Utc>,
}

/// Backend for generation-scoped response storage.
///
/// Individual key operations are atomic; backends serialize them
/// internally, so callers need no locking of their own. A `put` for an
/// existing identity replaces the previous entry.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Look up the entry for `identity` in `generation`.
  async fn get(&self, generation: &str, identity: &str) -> Result<Option<CachedEntry>>;

  /// Store (or overwrite) the entry for `identity` in `generation`,
  /// creating the generation if it does not exist yet.
  async fn put(&self, generation: &str, identity: &str, response: StoredResponse) -> Result<()>;

  /// Remove a generation and every entry in it.
  async fn delete(&self, generation: &str) -> Result<()>;

  /// Tags of all generations currently present.
  async fn list_generations(&self) -> Result<Vec<String>>;
}
