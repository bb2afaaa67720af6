use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application name, used for config, data and log locations
const APP_NAME: &str = "propdash";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base url of the REST API (e.g., "https://api.example.com/")
  pub url: String,
  /// Records requested per page
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Persist fetched collections between runs
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Days a cached collection counts as fresh
  #[serde(default = "default_freshness_days")]
  pub freshness_days: u32,
  /// Keep the durable cache when signing out
  #[serde(default)]
  pub retain_on_logout: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      freshness_days: default_freshness_days(),
      retain_on_logout: false,
    }
  }
}

impl CacheConfig {
  pub fn freshness_window(&self) -> Duration {
    Duration::days(i64::from(self.freshness_days))
  }
}

fn default_page_size() -> u32 {
  300
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

fn default_freshness_days() -> u32 {
  6 * 30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./propdash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/propdash/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/propdash/config.yaml\n\
                 with at least:\n\n  api:\n    url: https://api.example.com/"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("propdash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if config.api.page_size == 0 {
      return Err(eyre!("api.page_size must be greater than zero"));
    }

    Ok(config)
  }

  /// Directory for the cache database, session file and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_NAME))
  }

  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }

  pub fn session_path() -> Result<PathBuf> {
    Ok(Self::data_dir()?.join("session.json"))
  }

  /// Get an API token from the environment, if one is set.
  ///
  /// Checks PROPDASH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PROPDASH_API_TOKEN").ok()
  }

  /// Get the login password from environment variables.
  ///
  /// Checks PROPDASH_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("PROPDASH_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the PROPDASH_PASSWORD environment variable."))
  }
}
