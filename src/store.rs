//! Reactive session store for a record collection.
//!
//! The store holds the authoritative in-memory collection for the running
//! session. All mutation goes through `dispatch` with a named action, and
//! every accepted action publishes a new immutable snapshot on a watch
//! channel so readers never see a half-applied change.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::<PropertyRecordCard>::new();
//! let reader = store.reader();
//!
//! store.dispatch(StoreAction::BeginLoad)?;
//! store.dispatch(StoreAction::SetData(collection))?;
//!
//! match reader.get_status() {
//!     LoadStatus::Loading => render_spinner(),
//!     LoadStatus::Succeeded => render_table(&reader.get_collection()),
//!     LoadStatus::Failed => render_error(reader.get_state().error.as_deref()),
//!     LoadStatus::Idle => {}
//! }
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::RecordCollection;

/// Load status of the session store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
  /// Nothing loaded yet, or cleared on logout
  Idle,
  /// A load is in progress
  Loading,
  /// Data is available
  Succeeded,
  /// The last load failed
  Failed,
}

impl LoadStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Idle => "idle",
      Self::Loading => "loading",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
    }
  }
}

impl fmt::Display for LoadStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Named transitions of the store
#[derive(Debug, Clone)]
pub enum StoreAction<T> {
  BeginLoad,
  SetData(RecordCollection<T>),
  SetError(String),
  Clear,
}

impl<T> StoreAction<T> {
  fn name(&self) -> &'static str {
    match self {
      Self::BeginLoad => "begin_load",
      Self::SetData(_) => "set_data",
      Self::SetError(_) => "set_error",
      Self::Clear => "clear",
    }
  }
}

/// An action that is not allowed from the current status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot {action} while store is {from}")]
pub struct TransitionError {
  pub from: LoadStatus,
  pub action: &'static str,
}

/// Snapshot of the session store.
#[derive(Debug)]
pub struct SessionState<T> {
  pub status: LoadStatus,
  pub data: Arc<RecordCollection<T>>,
  pub error: Option<String>,
  pub last_fetched: Option<DateTime<Utc>>,
  /// Bumped by every accepted transition
  pub version: u64,
}

impl<T> Clone for SessionState<T> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: Arc::clone(&self.data),
      error: self.error.clone(),
      last_fetched: self.last_fetched,
      version: self.version,
    }
  }
}

impl<T> SessionState<T> {
  pub fn initial() -> Self {
    Self {
      status: LoadStatus::Idle,
      data: Arc::new(RecordCollection::empty()),
      error: None,
      last_fetched: None,
      version: 0,
    }
  }

  /// Compute the state after `action`, or reject it.
  ///
  /// | from      | begin_load | set_data  | set_error                | clear |
  /// |-----------|------------|-----------|--------------------------|-------|
  /// | idle      | loading    | -         | -                        | idle  |
  /// | loading   | -          | succeeded | failed                   | idle  |
  /// | succeeded | loading    | succeeded | succeeded, or failed if empty | idle |
  /// | failed    | loading    | -         | -                        | idle  |
  ///
  /// Data is kept across `begin_load` and `set_error` so the last good
  /// collection stays visible.
  pub fn reduce(&self, action: StoreAction<T>) -> Result<Self, TransitionError> {
    use LoadStatus::*;

    let rejected = TransitionError {
      from: self.status,
      action: action.name(),
    };
    let version = self.version + 1;

    match (self.status, action) {
      (_, StoreAction::Clear) => Ok(Self {
        version,
        ..Self::initial()
      }),
      (Idle | Succeeded | Failed, StoreAction::BeginLoad) => Ok(Self {
        status: Loading,
        version,
        ..self.clone()
      }),
      (Loading | Succeeded, StoreAction::SetData(collection)) => Ok(Self {
        status: Succeeded,
        last_fetched: collection.last_fetched.or(self.last_fetched),
        data: Arc::new(collection),
        error: None,
        version,
      }),
      (Loading, StoreAction::SetError(error)) => Ok(Self {
        status: Failed,
        error: Some(error),
        version,
        ..self.clone()
      }),
      (Succeeded, StoreAction::SetError(error)) => Ok(Self {
        // Stale-but-present data stays displayable
        status: if self.data.is_empty() {
          Failed
        } else {
          Succeeded
        },
        error: Some(error),
        version,
        ..self.clone()
      }),
      _ => Err(rejected),
    }
  }
}

/// Owner of the session state. Only the sync orchestrator and the logout
/// path hold one; everything else reads through a `StoreReader`.
pub struct Store<T> {
  tx: watch::Sender<Arc<SessionState<T>>>,
}

impl<T: Send + Sync + 'static> Store<T> {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(Arc::new(SessionState::initial()));
    Self { tx }
  }

  /// Apply `action`, publishing the new snapshot on success.
  pub fn dispatch(&self, action: StoreAction<T>) -> Result<Arc<SessionState<T>>, TransitionError> {
    let name = action.name();
    let mut outcome = None;

    self.tx.send_if_modified(|state| match state.reduce(action) {
      Ok(next) => {
        debug!(
          action = name,
          from = %state.status,
          to = %next.status,
          version = next.version,
          "store transition"
        );
        *state = Arc::new(next);
        outcome = Some(Ok(Arc::clone(state)));
        true
      }
      Err(e) => {
        warn!(action = name, from = %state.status, "rejected store transition");
        outcome = Some(Err(e));
        false
      }
    });

    outcome.unwrap_or_else(|| {
      Err(TransitionError {
        from: self.get_status(),
        action: name,
      })
    })
  }

  pub fn get_state(&self) -> Arc<SessionState<T>> {
    Arc::clone(&self.tx.borrow())
  }

  pub fn get_status(&self) -> LoadStatus {
    self.tx.borrow().status
  }

  pub fn get_collection(&self) -> Arc<RecordCollection<T>> {
    Arc::clone(&self.tx.borrow().data)
  }

  /// Read-only handle for consumers.
  pub fn reader(&self) -> StoreReader<T> {
    StoreReader {
      rx: self.tx.subscribe(),
    }
  }
}

impl<T: Send + Sync + 'static> Default for Store<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Read-only view of a `Store`.
pub struct StoreReader<T> {
  rx: watch::Receiver<Arc<SessionState<T>>>,
}

impl<T> StoreReader<T> {
  pub fn get_state(&self) -> Arc<SessionState<T>> {
    Arc::clone(&self.rx.borrow())
  }

  pub fn get_status(&self) -> LoadStatus {
    self.rx.borrow().status
  }

  pub fn get_collection(&self) -> Arc<RecordCollection<T>> {
    Arc::clone(&self.rx.borrow().data)
  }

  /// Wait for the next published snapshot.
  ///
  /// Returns `None` once the store is gone.
  pub async fn changed(&mut self) -> Option<Arc<SessionState<T>>> {
    self.rx.changed().await.ok()?;
    Some(Arc::clone(&self.rx.borrow_and_update()))
  }
}

impl<T> Clone for StoreReader<T> {
  fn clone(&self) -> Self {
    Self {
      rx: self.rx.clone(),
    }
  }
}
