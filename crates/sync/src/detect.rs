//! Per-file change detection against a checkpoint.
//!
//! Classifies the delta since the last pass without reading the whole file:
//! metadata first (identity, size, mtime), then two fixed-size SHA-256
//! sample windows. Window lengths derive from checkpoint fields only, so an
//! append never shifts the window being compared.

use std::{
  fs::Metadata,
  io::{Read, Seek, SeekFrom},
  path::Path,
  time::{SystemTime, UNIX_EPOCH},
};

use memsync_core::config::SAMPLE_BYTES;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::state::Checkpoint;

/// How a session file changed relative to its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
  /// Nothing changed; no I/O needed beyond the metadata check.
  None,
  /// New bytes after `last_offset`, existing bytes untouched.
  Append,
  /// Content at or before `last_offset` was altered in place.
  Modified,
  /// The file shrank below `last_size`.
  Truncated,
  /// The file was recreated under the same path (device/inode changed).
  Replaced,
}

impl ChangeClass {
  /// Whether this classification forces a full reread from byte 0.
  pub fn needs_full_reread(&self) -> bool {
    matches!(self, ChangeClass::Modified | ChangeClass::Truncated | ChangeClass::Replaced)
  }
}

/// (device, inode) identity of a file, when the platform exposes it.
pub fn file_identity(meta: &Metadata) -> Option<(u64, u64)> {
  #[cfg(unix)]
  {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
  }
  #[cfg(not(unix))]
  {
    let _ = meta;
    None
  }
}

/// File mtime in milliseconds since the epoch (0 when unavailable).
pub fn mtime_millis(meta: &Metadata) -> i64 {
  meta
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0)
}

/// Seconds since the file last changed, by mtime.
pub fn idle_secs(meta: &Metadata, now: SystemTime) -> u64 {
  meta
    .modified()
    .ok()
    .and_then(|t| now.duration_since(t).ok())
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// SHA-256 over `len` bytes starting at `start`, hex encoded.
///
/// An empty window hashes to the empty string, matching a fresh checkpoint.
pub fn hash_range(path: &Path, start: u64, len: u64) -> std::io::Result<String> {
  if len == 0 {
    return Ok(String::new());
  }

  let mut file = std::fs::File::open(path)?;
  file.seek(SeekFrom::Start(start))?;

  let mut hasher = Sha256::new();
  let mut remaining = len;
  let mut buf = [0u8; 8192];
  while remaining > 0 {
    let want = remaining.min(buf.len() as u64) as usize;
    let n = file.read(&mut buf[..want])?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
    remaining -= n as u64;
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Hash the leading window for a file read up to `last_size` bytes.
pub fn head_hash(path: &Path, last_size: u64) -> std::io::Result<String> {
  hash_range(path, 0, SAMPLE_BYTES.min(last_size))
}

/// Hash the trailing window ending at `last_offset`.
pub fn tail_hash(path: &Path, last_offset: u64) -> std::io::Result<String> {
  let start = last_offset.saturating_sub(SAMPLE_BYTES);
  hash_range(path, start, last_offset - start)
}

/// Classify the change since `checkpoint`.
///
/// Check order matters: identity, truncation, head window, tail window,
/// size. A matching (size, mtime) pair short-circuits before any file read.
pub fn classify(path: &Path, meta: &Metadata, checkpoint: &Checkpoint) -> std::io::Result<ChangeClass> {
  let size = meta.len();

  // Fast path: untouched file, zero reads.
  if size == checkpoint.last_size && mtime_millis(meta) == checkpoint.last_mtime_ms {
    return Ok(ChangeClass::None);
  }

  match file_identity(meta) {
    Some((device, inode)) => {
      if checkpoint.device != 0 && (device != checkpoint.device || inode != checkpoint.inode) {
        return Ok(ChangeClass::Replaced);
      }
    }
    None => {
      // Cannot prove identity: a full reread over-syncs, silently trusting
      // the path under-syncs.
      warn!(path = %path.display(), "File identity unavailable, treating as modified");
      return Ok(ChangeClass::Modified);
    }
  }

  if size < checkpoint.last_size {
    return Ok(ChangeClass::Truncated);
  }

  if checkpoint.last_offset > 0 {
    if !checkpoint.head_hash.is_empty() && head_hash(path, checkpoint.last_size)? != checkpoint.head_hash {
      return Ok(ChangeClass::Modified);
    }
    if !checkpoint.tail_hash.is_empty() && tail_hash(path, checkpoint.last_offset)? != checkpoint.tail_hash {
      return Ok(ChangeClass::Modified);
    }
  }

  if size == checkpoint.last_size {
    return Ok(ChangeClass::None);
  }

  Ok(ChangeClass::Append)
}
