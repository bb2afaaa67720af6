//! Durable caching of record collections for offline-first startup.
//!
//! This module provides:
//! - A key-value storage primitive (`CacheStorage`) with SQLite and no-op backends
//! - A per-collection cache (`CacheStore`) that stamps writes and judges freshness
//! - Stable cache keys for collections fetched with extra query parameters

mod keys;
mod layer;
mod storage;
mod traits;

pub use keys::cache_key;
pub use layer::{clear_all, default_freshness_window, CacheStore};
pub use storage::{AppStorage, CacheStorage, NoopStorage, SqliteStorage, StorageError};
pub use traits::{CacheEntry, CacheRead, Cacheable, Freshness, RecordCollection};
