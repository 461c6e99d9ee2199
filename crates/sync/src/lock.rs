//! Cross-process pass lock with stale-lock recovery.
//!
//! At most one ingestion pass runs per data directory, across processes.
//! The lock is an exclusively-created marker file in the OS temp directory
//! (outside the data directory) recording holder pid and acquisition time.
//! A crashed worker leaves a marker behind; markers older than the TTL are
//! forcibly reclaimed so the pipeline cannot wedge forever.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::LockError;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
  pid: u32,
  acquired_at: DateTime<Utc>,
}

/// Default marker path for a data directory, keyed by a hash of its path so
/// distinct data directories never contend.
pub fn lock_path_for(data_dir: &Path) -> PathBuf {
  let digest = Sha256::digest(data_dir.to_string_lossy().as_bytes());
  std::env::temp_dir().join(format!("memsync-{}.lock", hex::encode(&digest[..4])))
}

/// A held pass lock. Released explicitly or best-effort on drop.
#[derive(Debug)]
pub struct PassLock {
  path: PathBuf,
  released: bool,
}

impl PassLock {
  /// Attempt to acquire the lock.
  ///
  /// Returns `Ok(None)` when another live holder exists — contention is not
  /// an error, the caller simply skips this pass. A marker older than `ttl`
  /// is reclaimed and acquisition retried once.
  pub fn try_acquire(path: &Path, ttl: Duration) -> Result<Option<PassLock>, LockError> {
    match Self::create_marker(path) {
      Ok(()) => return Ok(Some(Self::held(path))),
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
      Err(e) => return Err(Self::io_err(path, e)),
    }

    let age = Self::marker_age(path);
    match age {
      Some(age) if age > ttl => {
        warn!(
          path = %path.display(),
          age_secs = age.as_secs(),
          ttl_secs = ttl.as_secs(),
          "Reclaiming stale lock from abnormally terminated worker"
        );
        let _ = std::fs::remove_file(path);
        // Retry once; a racing acquirer may legitimately win.
        match Self::create_marker(path) {
          Ok(()) => Ok(Some(Self::held(path))),
          Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Lost reclaim race, skipping pass");
            Ok(None)
          }
          Err(e) => Err(Self::io_err(path, e)),
        }
      }
      _ => {
        debug!(path = %path.display(), "Lock held by another worker, skipping pass");
        Ok(None)
      }
    }
  }

  /// Delete the marker, ending the exclusive window.
  pub fn release(mut self) -> Result<(), LockError> {
    self.released = true;
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Self::io_err(&self.path, e)),
    }
  }

  fn held(path: &Path) -> PassLock {
    PassLock {
      path: path.to_path_buf(),
      released: false,
    }
  }

  fn create_marker(path: &Path) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    let info = LockInfo {
      pid: std::process::id(),
      acquired_at: Utc::now(),
    };
    file.write_all(&serde_json::to_vec(&info).expect("lock info serialization cannot fail"))?;
    Ok(())
  }

  /// Age of an existing marker, preferring its recorded acquisition time and
  /// falling back to file mtime for unreadable/corrupt markers.
  fn marker_age(path: &Path) -> Option<Duration> {
    if let Ok(content) = std::fs::read_to_string(path)
      && let Ok(info) = serde_json::from_str::<LockInfo>(&content)
    {
      return (Utc::now() - info.acquired_at).to_std().ok();
    }
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    std::time::SystemTime::now().duration_since(modified).ok()
  }

  fn io_err(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

impl Drop for PassLock {
  fn drop(&mut self) {
    if !self.released {
      if let Err(e) = std::fs::remove_file(&self.path) {
        warn!(path = %self.path.display(), error = %e, "Failed to remove lock marker on drop");
      }
    }
  }
}
