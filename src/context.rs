use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::{ApiClient, ListResource, PaginatedFetcher};
use crate::cache::{cache_key, AppStorage, CacheStore, Cacheable, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::session::TokenSession;
use crate::store::Store;
use crate::sync::{DataSync, LogoutPolicy, SyncOptions};

/// Orchestrator wired to the real API client and configured storage
pub type AppSync<T> = DataSync<T, ApiClient, AppStorage>;

/// Shared handles for one run of the CLI.
pub struct AppContext {
  pub config: Config,
  pub session: Arc<TokenSession>,
  pub client: Arc<ApiClient>,
  pub storage: Arc<AppStorage>,
  /// Extra list query params; they also select the cache key
  pub extra_params: Vec<(String, String)>,
}

impl AppContext {
  pub fn new(config: Config) -> Result<Self> {
    let session = Arc::new(TokenSession::load(
      Config::session_path()?,
      Config::get_api_token(),
    )?);
    let client = Arc::new(ApiClient::new(&config, session.clone())?);

    // SQLite opens lazily on first cache access
    let storage = if config.cache.enabled {
      let path = config.cache_path()?;
      debug!(path = %path.display(), "using sqlite cache");
      AppStorage::Sqlite(SqliteStorage::new(path))
    } else {
      info!("durable cache disabled");
      AppStorage::Disabled(NoopStorage)
    };

    Ok(Self {
      config,
      session,
      client,
      storage: Arc::new(storage),
      extra_params: Vec::new(),
    })
  }

  pub fn with_extra_params(mut self, extra_params: Vec<(String, String)>) -> Self {
    if !extra_params.is_empty() {
      debug!(params = ?extra_params, "using extra query params");
    }
    self.extra_params = extra_params;
    self
  }

  pub fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      page_size: self.config.api.page_size,
      extra_params: self.extra_params.clone(),
      logout_policy: if self.config.cache.retain_on_logout {
        LogoutPolicy::RetainCache
      } else {
        LogoutPolicy::ClearCache
      },
    }
  }

  pub fn cache_for<T: Cacheable>(&self, extra: &[(String, String)]) -> CacheStore<AppStorage> {
    CacheStore::new(self.storage.clone(), cache_key::<T>(extra))
      .with_freshness_window(self.config.cache.freshness_window())
  }

  /// Build an orchestrator for `T` with a fresh session store.
  pub fn data_sync<T: Cacheable + ListResource>(&self) -> Arc<AppSync<T>> {
    let options = self.sync_options();
    DataSync::new(
      PaginatedFetcher::new(self.client.clone()),
      self.cache_for::<T>(&options.extra_params),
      Arc::new(Store::new()),
      options,
    )
  }
}
