//! Durable cache store: one collection per key, with a freshness verdict.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::storage::{CacheStorage, StorageError};
use super::traits::{CacheEntry, CacheRead, Cacheable, RecordCollection};

/// Default freshness window: six 30-day months.
pub fn default_freshness_window() -> Duration {
  Duration::days(6 * 30)
}

/// Durable cache for a single collection.
///
/// Freshness is decided purely by age; real invalidation happens through
/// `clear`.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  key: String,
  /// How long a saved collection counts as fresh
  freshness_window: Duration,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: Arc<S>, key: impl Into<String>) -> Self {
    Self {
      storage,
      key: key.into(),
      freshness_window: default_freshness_window(),
    }
  }

  /// Set the freshness window.
  pub fn with_freshness_window(mut self, window: Duration) -> Self {
    self.freshness_window = window;
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn freshness_window(&self) -> Duration {
    self.freshness_window
  }

  /// Whether an entry written at `written` is still fresh at `now`.
  pub fn is_fresh(&self, written: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - written < self.freshness_window
  }

  /// Overwrite the entry with `collection`, stamped with the current time.
  pub async fn save<T: Cacheable>(&self, collection: &RecordCollection<T>) -> Result<(), StorageError> {
    self.save_at(collection, Utc::now()).await
  }

  /// Overwrite the entry with `collection`, stamped with `timestamp`.
  pub async fn save_at<T: Cacheable>(
    &self,
    collection: &RecordCollection<T>,
    timestamp: DateTime<Utc>,
  ) -> Result<(), StorageError> {
    let entry = CacheEntry {
      data: collection.clone(),
      timestamp,
    };
    let payload = serde_json::to_vec(&entry).map_err(|e| StorageError::Codec(e.to_string()))?;

    self.storage.put(&self.key, &payload).await?;
    info!(key = %self.key, records = collection.len(), "saved collection to cache");
    Ok(())
  }

  /// Read the entry with a freshness verdict against the current time.
  pub async fn read<T: Cacheable>(&self) -> Result<CacheRead<T>, StorageError> {
    self.read_at(Utc::now()).await
  }

  /// Read the entry with a freshness verdict against `now`.
  ///
  /// A missing entry is `CacheRead::miss()`, not an error.
  pub async fn read_at<T: Cacheable>(&self, now: DateTime<Utc>) -> Result<CacheRead<T>, StorageError> {
    let payload = match self.storage.get(&self.key).await? {
      Some(payload) => payload,
      None => {
        debug!(key = %self.key, "no cached collection");
        return Ok(CacheRead::miss());
      }
    };

    let entry: CacheEntry<T> =
      serde_json::from_slice(&payload).map_err(|e| StorageError::Codec(e.to_string()))?;
    let is_fresh = self.is_fresh(entry.timestamp, now);

    debug!(
      key = %self.key,
      records = entry.data.len(),
      fresh = is_fresh,
      "read cached collection"
    );

    Ok(CacheRead {
      data: Some(entry.data),
      is_fresh,
    })
  }

  /// Delete the entry. Clearing an empty cache is fine.
  pub async fn clear(&self) -> Result<(), StorageError> {
    self.storage.delete(&self.key).await?;
    info!(key = %self.key, "cleared cached collection");
    Ok(())
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      key: self.key.clone(),
      freshness_window: self.freshness_window,
    }
  }
}

/// Delete every entry in `storage`, returning how many keys were removed.
pub async fn clear_all<S: CacheStorage>(storage: &S) -> Result<usize, StorageError> {
  let keys = storage.keys().await?;
  for key in &keys {
    storage.delete(key).await?;
  }
  info!(removed = keys.len(), "cleared cache");
  Ok(keys.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::PropertyRecordCard;
  use crate::testing::{collection, MemoryStorage};

  fn store(storage: &Arc<MemoryStorage>) -> CacheStore<MemoryStorage> {
    CacheStore::new(Arc::clone(storage), "property_record_card")
  }

  #[tokio::test]
  async fn test_missing_entry_is_a_miss() {
    let storage = Arc::new(MemoryStorage::default());
    let read = store(&storage).read::<PropertyRecordCard>().await.unwrap();

    assert_eq!(read, CacheRead::miss());
    assert!(read.data.is_none());
    assert!(!read.is_fresh);
  }

  #[tokio::test]
  async fn test_repeated_reads_agree() {
    let storage = Arc::new(MemoryStorage::default());
    let cache = store(&storage);
    cache.save(&collection(&[1, 2, 3])).await.unwrap();

    let first = cache.read::<PropertyRecordCard>().await.unwrap();
    let second = cache.read::<PropertyRecordCard>().await.unwrap();

    assert_eq!(first, second);
    assert!(first.is_fresh);
    assert_eq!(first.data.unwrap().count, 3);
  }

  #[tokio::test]
  async fn test_freshness_boundary() {
    let storage = Arc::new(MemoryStorage::default());
    let window = Duration::days(180);
    let cache = store(&storage).with_freshness_window(window);
    let t0 = Utc::now();
    cache.save_at(&collection(&[1]), t0).await.unwrap();

    let just_inside = cache
      .read_at::<PropertyRecordCard>(t0 + window - Duration::milliseconds(1))
      .await
      .unwrap();
    let just_outside = cache
      .read_at::<PropertyRecordCard>(t0 + window + Duration::milliseconds(1))
      .await
      .unwrap();

    assert!(just_inside.is_fresh);
    assert!(!just_outside.is_fresh);
    // Stale entries still hand back their data
    assert!(just_outside.data.is_some());
  }

  #[tokio::test]
  async fn test_save_overwrites_previous_entry() {
    let storage = Arc::new(MemoryStorage::default());
    let cache = store(&storage);
    cache.save(&collection(&[1, 2])).await.unwrap();
    cache.save(&collection(&[7])).await.unwrap();

    let read = cache.read::<PropertyRecordCard>().await.unwrap();
    let ids: Vec<u64> = read.data.unwrap().data.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![7]);
  }

  #[tokio::test]
  async fn test_clear_is_idempotent() {
    let storage = Arc::new(MemoryStorage::default());
    let cache = store(&storage);
    cache.save(&collection(&[1])).await.unwrap();

    cache.clear().await.unwrap();
    cache.clear().await.unwrap();

    assert_eq!(cache.read::<PropertyRecordCard>().await.unwrap(), CacheRead::miss());
  }

  #[tokio::test]
  async fn test_corrupt_payload_is_a_codec_error() {
    let storage = Arc::new(MemoryStorage::default());
    storage.put("property_record_card", b"{not json").await.unwrap();

    let err = store(&storage)
      .read::<PropertyRecordCard>()
      .await
      .unwrap_err();
    assert!(matches!(err, StorageError::Codec(_)));
  }

  #[tokio::test]
  async fn test_write_failure_propagates() {
    let storage = Arc::new(MemoryStorage::default().failing_writes());
    let err = store(&storage).save(&collection(&[1])).await.unwrap_err();
    assert!(matches!(err, StorageError::Write(_)));
  }

  #[tokio::test]
  async fn test_clear_all_removes_every_key() {
    let storage = Arc::new(MemoryStorage::default());
    storage.put("report", b"{}").await.unwrap();
    storage.put("report_request", b"{}").await.unwrap();

    assert_eq!(clear_all(storage.as_ref()).await.unwrap(), 2);
    assert!(storage.keys().await.unwrap().is_empty());
  }
}
