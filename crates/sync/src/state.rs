//! Persisted per-session checkpoints and the processed-archive set.
//!
//! The whole state is one JSON document replaced atomically on every update
//! (write-temp-then-rename), so a concurrent reader never observes a partial
//! write. Unknown fields are ignored on load: the schema has grown over time
//! (the archive table once lacked file identity) and older state must keep
//! loading.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StateError;

/// Current on-disk schema version. Older versions load with defaulted fields.
pub const STATE_VERSION: u32 = 2;

/// Read-progress marker for one session file.
///
/// `last_offset` only moves forward for a given (device, inode); any identity
/// change invalidates the checkpoint and forces a full reread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
  /// Backing file path at the time of the last pass.
  pub file_path: PathBuf,

  /// Device id of the backing file (0 when unavailable).
  pub device: u64,

  /// Inode of the backing file (0 when unavailable).
  pub inode: u64,

  /// Byte offset up to which the file has been read.
  pub last_offset: u64,

  /// File size observed at the last pass.
  pub last_size: u64,

  /// File mtime in milliseconds since the epoch, for the no-change fast path
  /// and the idle-flush clock.
  pub last_mtime_ms: i64,

  /// Byte offset where the unfinalized tail begins. The staged tail is
  /// re-derived from `tail_offset..last_offset` on every pass rather than
  /// persisted, so a restart mid-accumulation loses nothing.
  pub tail_offset: u64,

  /// Number of finalized parts; part numbering is contiguous from 0.
  pub part_count: u32,

  /// Number of parts successfully handed to the extraction engine. Parts in
  /// `ingested_parts..part_count` are durable and pending retry.
  pub ingested_parts: u32,

  /// SHA-256 of the leading sample window, sized by `last_size`.
  pub head_hash: String,

  /// SHA-256 of the trailing sample window ending at `last_offset`.
  pub tail_hash: String,
}

impl Checkpoint {
  /// Number of parts finalized but not yet handed off.
  pub fn pending_parts(&self) -> u32 {
    self.part_count.saturating_sub(self.ingested_parts)
  }

  /// Whether unfinalized tail bytes are staged.
  pub fn has_staged_tail(&self) -> bool {
    self.tail_offset < self.last_offset
  }
}

/// The full persisted state for one data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
  pub version: u32,

  /// Per-session checkpoints keyed by session id.
  pub sessions: BTreeMap<String, Checkpoint>,

  /// Archived file names (including rotation marker) already fully ingested.
  /// Membership only grows; members are never re-read.
  pub processed_archives: BTreeSet<String>,
}

impl Default for SessionState {
  fn default() -> Self {
    Self {
      version: STATE_VERSION,
      sessions: BTreeMap::new(),
      processed_archives: BTreeSet::new(),
    }
  }
}

impl SessionState {
  /// Load state from disk.
  ///
  /// A missing file is a fresh install and yields the default state. An
  /// unparseable file is fatal: silently discarding checkpoints would cause
  /// duplicate ingestion.
  pub fn load(path: &Path) -> Result<Self, StateError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(e) => {
        return Err(StateError::Io {
          path: path.to_path_buf(),
          source: e,
        });
      }
    };

    let mut state: SessionState = serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
      path: path.to_path_buf(),
      source: e,
    })?;

    if state.version > STATE_VERSION {
      warn!(
        found = state.version,
        supported = STATE_VERSION,
        "State file written by a newer version; unknown fields were ignored"
      );
    }
    // Older versions migrate in place: absent fields already defaulted.
    state.version = STATE_VERSION;

    Ok(state)
  }

  /// Persist state via atomic full-file replacement.
  pub fn save(&self, path: &Path) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
      path: path.to_path_buf(),
      source,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let encoded = serde_json::to_vec_pretty(self).expect("state serialization cannot fail");
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &encoded).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
  }

  pub fn checkpoint(&self, session_id: &str) -> Option<&Checkpoint> {
    self.sessions.get(session_id)
  }

  pub fn is_archive_processed(&self, file_name: &str) -> bool {
    self.processed_archives.contains(file_name)
  }
}
