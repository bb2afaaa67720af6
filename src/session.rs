//! Authenticated session backed by a bearer token.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::api::api_types::LoginResponse;

/// Session/auth collaborator consumed by the API client and logout path.
pub trait SessionProvider: Send + Sync {
  fn is_authenticated(&self) -> bool;

  /// Token to attach to API requests, if signed in.
  fn bearer_token(&self) -> Option<String>;

  /// Forget the current credentials.
  fn sign_out(&self) -> Result<()>;
}

/// What gets persisted in the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
  username: String,
  access: String,
  refresh: String,
  signed_in_at: DateTime<Utc>,
}

/// Session persisted to a JSON file in the data directory.
///
/// A token given through the environment takes precedence and is never
/// written to disk.
pub struct TokenSession {
  path: PathBuf,
  env_token: Option<String>,
  stored: RwLock<Option<StoredSession>>,
}

impl TokenSession {
  /// Load the session file if present.
  pub fn load(path: impl Into<PathBuf>, env_token: Option<String>) -> Result<Self> {
    let path = path.into();
    let stored = if path.exists() {
      let contents = std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
      match serde_json::from_str::<StoredSession>(&contents) {
        Ok(session) => Some(session),
        Err(e) => {
          warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
          None
        }
      }
    } else {
      None
    };

    Ok(Self {
      path,
      env_token: env_token.filter(|t| !t.trim().is_empty()),
      stored: RwLock::new(stored),
    })
  }

  /// Record a fresh token pair and persist it.
  pub fn sign_in(&self, username: &str, tokens: LoginResponse) -> Result<()> {
    let session = StoredSession {
      username: username.to_string(),
      access: tokens.access,
      refresh: tokens.refresh,
      signed_in_at: Utc::now(),
    };

    write_session_file(&self.path, &session)?;

    let mut stored = self
      .stored
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *stored = Some(session);

    info!(username, "signed in");
    Ok(())
  }

  /// Username of the stored session, if any.
  pub fn username(&self) -> Option<String> {
    self
      .stored
      .read()
      .ok()
      .and_then(|s| s.as_ref().map(|s| s.username.clone()))
  }

  pub fn uses_env_token(&self) -> bool {
    self.env_token.is_some()
  }
}

impl SessionProvider for TokenSession {
  fn is_authenticated(&self) -> bool {
    self.bearer_token().is_some()
  }

  fn bearer_token(&self) -> Option<String> {
    if let Some(token) = &self.env_token {
      return Some(token.clone());
    }
    self
      .stored
      .read()
      .ok()
      .and_then(|s| s.as_ref().map(|s| s.access.clone()))
  }

  fn sign_out(&self) -> Result<()> {
    {
      let mut stored = self
        .stored
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      *stored = None;
    }

    match std::fs::remove_file(&self.path) {
      Ok(()) => info!("signed out"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => {
        return Err(eyre!(
          "Failed to remove session file {}: {}",
          self.path.display(),
          e
        ))
      }
    }
    Ok(())
  }
}

fn write_session_file(path: &Path, session: &StoredSession) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
  }

  let contents =
    serde_json::to_string_pretty(session).map_err(|e| eyre!("Failed to encode session: {}", e))?;
  std::fs::write(path, contents)
    .map_err(|e| eyre!("Failed to write session file {}: {}", path.display(), e))?;
  Ok(())
}
