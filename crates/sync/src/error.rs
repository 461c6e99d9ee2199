//! Error types for the ingestion pipeline.
//!
//! Per-session problems are captured in the pass report and never abort a
//! pass; only state-store and lock I/O failures surface as hard errors.

use std::path::PathBuf;

/// Errors from the persisted session-state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("state i/o failed at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The persisted state exists but cannot be parsed. Fatal for the data
  /// directory: guessing here would cause duplicate ingestion.
  #[error("state file at {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Errors from the cross-process lock marker.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
  #[error("lock marker i/o failed at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors from the extraction-engine handoff.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("engine request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("engine returned status {status}")]
  Status { status: u16 },

  #[error("engine call exceeded {}s", timeout.as_secs())]
  Timeout { timeout: std::time::Duration },

  #[error("engine rejected part: {0}")]
  Rejected(String),
}

/// Top-level pipeline error, surfaced to whatever triggered the pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to initialize file watcher: {0}")]
  Watcher(#[from] notify::Error),

  #[error("i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl SyncError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}
