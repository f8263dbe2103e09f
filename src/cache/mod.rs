//! Generation-scoped response cache.
//!
//! The store keeps named generations, each a flat map from request identity
//! to the most recently stored response. Exactly one generation is current
//! at a time; the rest exist only until the next activation sweep.

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheStore, CachedEntry};
