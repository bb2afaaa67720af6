//! Session data synchronization.
//!
//! `DataSync` bridges the durable cache and the session store for one
//! collection. On `initialize` it serves whatever the cache holds right away
//! and, when that is stale or missing, refetches in the background. Results
//! are published in two phases on an event channel: `Cached` first, then
//! `Refreshed` or `RefreshFailed`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::api::{FetchError, ListResource, PageSource, PaginatedFetcher};
use crate::cache::{
  CacheRead, CacheStorage, CacheStore, Cacheable, Freshness, RecordCollection, StorageError,
};
use crate::store::{LoadStatus, Store, StoreAction, StoreReader};

/// Buffered events per subscriber
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  /// A write-back was attempted after the session it belonged to ended.
  #[error("session ended before the fetch completed")]
  StaleSession,
}

/// Lifecycle of one session's synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
  NotStarted,
  Initializing,
  CacheHitFresh,
  CacheHitStaleRefetching,
  CacheMissFetching,
  Ready,
  Failed,
}

impl SyncPhase {
  pub fn can_transition_to(self, next: SyncPhase) -> bool {
    use SyncPhase::*;

    matches!(
      (self, next),
      (_, NotStarted)
        | (NotStarted, Initializing)
        | (Initializing, CacheHitFresh | CacheHitStaleRefetching | CacheMissFetching | Ready)
        | (CacheHitFresh, Ready)
        | (CacheHitStaleRefetching | CacheMissFetching, Ready | Failed)
        | (Failed, Ready)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, SyncPhase::Ready | SyncPhase::Failed)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::NotStarted => "not_started",
      Self::Initializing => "initializing",
      Self::CacheHitFresh => "cache_hit_fresh",
      Self::CacheHitStaleRefetching => "cache_hit_stale_refetching",
      Self::CacheMissFetching => "cache_miss_fetching",
      Self::Ready => "ready",
      Self::Failed => "failed",
    }
  }
}

/// Two-phase delivery of a session's collection
#[derive(Debug, Clone)]
pub enum SyncEvent<T> {
  /// What the cache held at startup (possibly empty)
  Cached {
    collection: Arc<RecordCollection<T>>,
    freshness: Freshness,
  },
  /// A full refetch replaced the collection
  Refreshed(Arc<RecordCollection<T>>),
  /// A refetch failed; the previous collection stays in place
  RefreshFailed(String),
}

/// What happens to the durable cache on logout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutPolicy {
  #[default]
  ClearCache,
  /// Keep the cache so the next sign-in starts instantly
  RetainCache,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub page_size: u32,
  pub extra_params: Vec<(String, String)>,
  pub logout_policy: LogoutPolicy,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      page_size: 300,
      extra_params: Vec::new(),
      logout_policy: LogoutPolicy::default(),
    }
  }
}

/// Orchestrates cache, network and session store for one collection.
pub struct DataSync<T, P, S>
where
  T: Cacheable + ListResource,
  P: PageSource,
  S: CacheStorage,
{
  fetcher: PaginatedFetcher<P>,
  cache: CacheStore<S>,
  store: Arc<Store<T>>,
  options: SyncOptions,
  phase: watch::Sender<SyncPhase>,
  /// Set once `initialize` has run for the current session
  started: AtomicBool,
  /// Session generation of the fetch in flight, if any
  in_flight: Mutex<Option<u64>>,
  /// Bumped on every `clear`; write-backs from older generations are dropped
  generation: AtomicU64,
  /// Serializes store/cache write-backs with `clear`
  write_lock: AsyncMutex<()>,
  events: broadcast::Sender<SyncEvent<T>>,
}

impl<T, P, S> DataSync<T, P, S>
where
  T: Cacheable + ListResource,
  P: PageSource + 'static,
  S: CacheStorage + 'static,
{
  pub fn new(
    fetcher: PaginatedFetcher<P>,
    cache: CacheStore<S>,
    store: Arc<Store<T>>,
    options: SyncOptions,
  ) -> Arc<Self> {
    let (phase, _) = watch::channel(SyncPhase::NotStarted);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    Arc::new(Self {
      fetcher,
      cache,
      store,
      options,
      phase,
      started: AtomicBool::new(false),
      in_flight: Mutex::new(None),
      generation: AtomicU64::new(0),
      write_lock: AsyncMutex::new(()),
      events,
    })
  }

  pub fn reader(&self) -> StoreReader<T> {
    self.store.reader()
  }

  pub fn get_collection(&self) -> Arc<RecordCollection<T>> {
    self.store.get_collection()
  }

  pub fn get_status(&self) -> LoadStatus {
    self.store.get_status()
  }

  pub fn phase(&self) -> SyncPhase {
    *self.phase.borrow()
  }

  pub fn cache(&self) -> &CacheStore<S> {
    &self.cache
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent<T>> {
    self.events.subscribe()
  }

  /// Wait until the current (or a later) session reaches `Ready` or `Failed`.
  pub async fn settled(&self) -> SyncPhase {
    let mut rx = self.phase.subscribe();
    let phase = match rx.wait_for(|phase| phase.is_terminal()).await {
      Ok(phase) => *phase,
      Err(_) => self.phase(),
    };
    phase
  }

  /// Load the session's collection. Runs at most once per session; later
  /// calls return the current phase without doing any I/O.
  ///
  /// Returns once the store holds the cached collection (possibly empty).
  /// A needed refetch keeps running in the background; use `settled` or
  /// `subscribe` to follow it.
  pub async fn initialize(self: &Arc<Self>) -> SyncPhase {
    let resource = T::entity_type();

    // Claiming the session and reading its generation must not straddle a `clear`
    let generation = {
      let _guard = self.write_lock.lock().await;
      if self
        .started
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
      {
        debug!(resource, "initialize already ran this session");
        return self.phase();
      }
      self.transition(SyncPhase::Initializing);
      self.generation.load(Ordering::Acquire)
    };

    let state = self.store.get_state();
    if state.status == LoadStatus::Succeeded && !state.data.is_empty() {
      info!(resource, records = state.data.len(), "store already populated");
      self.transition(SyncPhase::Ready);
      return self.phase();
    }

    let read = match self.cache.read::<T>().await {
      Ok(read) => read,
      Err(e) => {
        warn!(resource, error = %e, "cache read failed, treating as a miss");
        CacheRead::miss()
      }
    };
    let freshness = read.freshness();

    {
      let _guard = self.write_lock.lock().await;
      if self.is_stale(generation) {
        debug!(resource, "session ended during cache read");
        return self.phase();
      }

      let collection = self.apply_data(read.data.unwrap_or_default());
      info!(
        resource,
        records = collection.len(),
        freshness = freshness.as_str(),
        "serving cached collection"
      );
      self.emit(SyncEvent::Cached {
        collection,
        freshness,
      });
    }

    match freshness {
      Freshness::Fresh => {
        self.transition(SyncPhase::CacheHitFresh);
        self.transition(SyncPhase::Ready);
      }
      Freshness::Stale => {
        self.transition(SyncPhase::CacheHitStaleRefetching);
        self.spawn_fetch(generation);
      }
      Freshness::Missing => {
        self.transition(SyncPhase::CacheMissFetching);
        self.spawn_fetch(generation);
      }
    }

    self.phase()
  }

  /// Force a full refetch. A no-op while another fetch is in flight.
  pub async fn refresh(&self) -> Result<(), SyncError> {
    let generation = self.generation.load(Ordering::Acquire);
    if !self.claim_fetch(generation) {
      debug!(resource = T::entity_type(), "refresh skipped, fetch already in flight");
      return Ok(());
    }

    {
      let _guard = self.write_lock.lock().await;
      if self.is_stale(generation) {
        self.release_fetch(generation);
        return Ok(());
      }
      if let Err(e) = self.store.dispatch(StoreAction::BeginLoad) {
        debug!(error = %e, "store not ready for a new load");
      }
    }

    match self.run_fetch(generation).await {
      Ok(_) | Err(SyncError::StaleSession) => Ok(()),
      Err(e) => Err(e),
    }
  }

  /// End the session: reset the store, re-arm `initialize`, and apply the
  /// logout cache policy. Fetches still in flight will not write back.
  pub async fn clear(&self) -> Result<(), SyncError> {
    let _guard = self.write_lock.lock().await;

    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
    if let Err(e) = self.store.dispatch(StoreAction::Clear) {
      warn!(error = %e, "store refused to clear");
    }
    self.started.store(false, Ordering::Release);
    self.phase.send_replace(SyncPhase::NotStarted);
    info!(resource = T::entity_type(), generation, "session cleared");

    match self.options.logout_policy {
      LogoutPolicy::ClearCache => self.cache.clear().await?,
      LogoutPolicy::RetainCache => {
        info!(key = self.cache.key(), "keeping durable cache across logout")
      }
    }
    Ok(())
  }

  fn spawn_fetch(self: &Arc<Self>, generation: u64) {
    if !self.claim_fetch(generation) {
      // The running fetch settles the phase when it finishes
      debug!(resource = T::entity_type(), "fetch already in flight");
      return;
    }

    let this = Arc::clone(self);
    tokio::spawn(async move {
      // Outcome is already reflected in the store and events
      let _ = this.run_fetch(generation).await;
    });
  }

  /// Fetch and write back. The caller must have claimed the fetch slot.
  async fn run_fetch(&self, generation: u64) -> Result<Arc<RecordCollection<T>>, SyncError> {
    let result = self
      .fetcher
      .fetch_all::<T>(self.options.page_size, &self.options.extra_params)
      .await;

    let outcome = match result {
      Ok(collection) => self.write_back(generation, collection).await,
      Err(e) => self.record_failure(generation, e).await,
    };

    self.release_fetch(generation);
    outcome
  }

  async fn write_back(
    &self,
    generation: u64,
    collection: RecordCollection<T>,
  ) -> Result<Arc<RecordCollection<T>>, SyncError> {
    let _guard = self.write_lock.lock().await;
    if self.is_stale(generation) {
      debug!(resource = T::entity_type(), "dropping fetch from an ended session");
      return Err(SyncError::StaleSession);
    }

    if let Err(e) = self.cache.save(&collection).await {
      // The session still has the data in memory
      warn!(resource = T::entity_type(), error = %e, "fetched collection not persisted");
    }

    let data = self.apply_data(collection);
    self.emit(SyncEvent::Refreshed(Arc::clone(&data)));
    self.settle(true);
    Ok(data)
  }

  async fn record_failure(&self, generation: u64, err: FetchError) -> Result<Arc<RecordCollection<T>>, SyncError> {
    let _guard = self.write_lock.lock().await;
    if self.is_stale(generation) {
      return Err(SyncError::StaleSession);
    }

    warn!(resource = T::entity_type(), error = %err, "fetch failed");
    if let Err(e) = self.store.dispatch(StoreAction::SetError(err.to_string())) {
      debug!(error = %e, "could not record fetch error");
    }
    self.emit(SyncEvent::RefreshFailed(err.to_string()));

    // Previously displayed data keeps the session usable
    let has_data = !self.store.get_collection().is_empty();
    self.settle(has_data);
    Err(SyncError::Fetch(err))
  }

  /// Put `collection` into the store, passing through `loading` if needed.
  fn apply_data(&self, collection: RecordCollection<T>) -> Arc<RecordCollection<T>> {
    if !matches!(
      self.store.get_status(),
      LoadStatus::Loading | LoadStatus::Succeeded
    ) {
      if let Err(e) = self.store.dispatch(StoreAction::BeginLoad) {
        debug!(error = %e, "store not ready for a new load");
      }
    }

    match self.store.dispatch(StoreAction::SetData(collection)) {
      Ok(state) => Arc::clone(&state.data),
      Err(e) => {
        warn!(error = %e, "store rejected collection");
        self.store.get_collection()
      }
    }
  }

  /// Move a fetching phase to its terminal phase. A failed session recovers
  /// once usable data arrives.
  fn settle(&self, usable: bool) {
    match self.phase() {
      SyncPhase::CacheHitStaleRefetching | SyncPhase::CacheMissFetching => {
        self.transition(if usable {
          SyncPhase::Ready
        } else {
          SyncPhase::Failed
        });
      }
      SyncPhase::Failed if usable => self.transition(SyncPhase::Ready),
      _ => {}
    }
  }

  fn transition(&self, next: SyncPhase) {
    let resource = T::entity_type();
    self.phase.send_if_modified(|phase| {
      if phase.can_transition_to(next) {
        info!(resource, from = phase.as_str(), to = next.as_str(), "sync phase");
        *phase = next;
        true
      } else {
        warn!(resource, from = phase.as_str(), to = next.as_str(), "invalid sync phase transition");
        false
      }
    });
  }

  fn is_stale(&self, generation: u64) -> bool {
    self.generation.load(Ordering::Acquire) != generation
  }

  fn in_flight(&self) -> MutexGuard<'_, Option<u64>> {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Claim the single fetch slot for `generation`.
  fn claim_fetch(&self, generation: u64) -> bool {
    let mut in_flight = self.in_flight();
    match *in_flight {
      Some(g) if g == generation => false,
      _ => {
        *in_flight = Some(generation);
        true
      }
    }
  }

  fn release_fetch(&self, generation: u64) {
    let mut in_flight = self.in_flight();
    if *in_flight == Some(generation) {
      *in_flight = None;
    }
  }

  fn emit(&self, event: SyncEvent<T>) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }
}
