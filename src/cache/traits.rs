//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Trait for records that can be cached as a collection.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity type name, used as the base cache key (e.g., "report")
  fn entity_type() -> &'static str;
}

/// An ordered set of records plus the server-reported total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCollection<T> {
  pub count: u64,
  pub data: Vec<T>,
  #[serde(
    default,
    with = "chrono::serde::ts_milliseconds_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub last_fetched: Option<DateTime<Utc>>,
}

impl<T> RecordCollection<T> {
  pub fn empty() -> Self {
    Self {
      count: 0,
      data: Vec::new(),
      last_fetched: None,
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Whether every record the server announced was received.
  pub fn is_complete(&self) -> bool {
    self.data.len() as u64 == self.count
  }
}

impl<T> Default for RecordCollection<T> {
  fn default() -> Self {
    Self::empty()
  }
}

/// What the durable cache persists: a collection and its write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: RecordCollection<T>,
  /// Write time, epoch milliseconds on disk
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
}

/// Freshness of what the cache returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Entry exists and is inside the freshness window
  Fresh,
  /// Entry exists but is older than the window
  Stale,
  /// No entry
  Missing,
}

impl Freshness {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Fresh => "fresh",
      Self::Stale => "stale",
      Self::Missing => "missing",
    }
  }
}

/// Result of reading the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
  pub data: Option<RecordCollection<T>>,
  pub is_fresh: bool,
}

impl<T> CacheRead<T> {
  pub fn miss() -> Self {
    Self {
      data: None,
      is_fresh: false,
    }
  }

  pub fn freshness(&self) -> Freshness {
    match (&self.data, self.is_fresh) {
      (None, _) => Freshness::Missing,
      (Some(_), true) => Freshness::Fresh,
      (Some(_), false) => Freshness::Stale,
    }
  }
}
