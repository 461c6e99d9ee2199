//! Configuration for the session-ingestion pipeline.
//!
//! Every recognized option is an explicit field with a default and a
//! validated range. Config is loaded from `memsync.toml` in the data
//! directory; a missing or unreadable file falls back to defaults so a fresh
//! install works with zero setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bytes hashed for the head/tail change-detection windows.
pub const SAMPLE_BYTES: u64 = 64 * 1024;

/// Extraction engine endpoint settings.
///
/// When `url` is unset, finalized parts stay on disk and the handoff is a
/// logged no-op (useful for dry runs and for operators that ingest parts out
/// of band).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Base URL of the extraction service (e.g. "http://127.0.0.1:8765").
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  /// User identity attached to every ingest request.
  pub user_id: String,
}

/// Top-level configuration for one data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Directory containing active and archived session JSONL files.
  pub sessions_dir: PathBuf,

  /// Directory holding state, finalized parts, and logs.
  pub data_dir: PathBuf,

  /// Messages per finalized part. A staged tail reaching this count closes
  /// immediately.
  pub max_messages_per_part: usize,

  /// Seconds of file inactivity after which a staged tail is finalized even
  /// if below the count threshold.
  pub idle_flush_secs: u64,

  /// Quiet window for collapsing filesystem notifications into one pass.
  pub debounce_ms: u64,

  /// Age after which a held lock marker is considered abandoned.
  pub lock_ttl_secs: u64,

  /// Upper bound on a single extraction-engine call.
  pub engine_timeout_secs: u64,

  /// Include sessions whose identifier is not primary-shaped (sub-agent and
  /// tool sessions).
  pub include_non_primary: bool,

  /// Extraction engine settings.
  pub engine: EngineConfig,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      sessions_dir: crate::dirs::default_sessions_dir(),
      data_dir: crate::dirs::default_data_dir(),
      max_messages_per_part: 60,
      idle_flush_secs: 1800,
      debounce_ms: 5000,
      lock_ttl_secs: 900,
      engine_timeout_secs: 600,
      include_non_primary: false,
      engine: EngineConfig {
        url: None,
        user_id: "default".to_string(),
      },
    }
  }
}

impl SyncConfig {
  /// Load config from `memsync.toml` under the given data directory.
  ///
  /// Missing file or parse failure falls back to defaults (with a warning
  /// for the latter). The returned config is always validated.
  pub fn load(data_dir: &Path) -> Self {
    let path = data_dir.join("memsync.toml");

    let mut config = match std::fs::read_to_string(&path) {
      Ok(content) => match toml::from_str::<SyncConfig>(&content) {
        Ok(config) => config,
        Err(e) => {
          warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
          SyncConfig::default()
        }
      },
      Err(_) => SyncConfig::default(),
    };

    // The data dir we loaded from wins over whatever the file claims.
    config.data_dir = data_dir.to_path_buf();
    config.validate();
    config
  }

  /// Clamp out-of-range values to sane minimums.
  pub fn validate(&mut self) {
    if self.max_messages_per_part == 0 {
      warn!("max_messages_per_part must be at least 1, clamping");
      self.max_messages_per_part = 1;
    }
    if self.idle_flush_secs < 60 {
      warn!(
        idle_flush_secs = self.idle_flush_secs,
        "idle_flush_secs below 60s would finalize mid-conversation, clamping to 60"
      );
      self.idle_flush_secs = 60;
    }
    if self.debounce_ms < 100 {
      warn!(debounce_ms = self.debounce_ms, "debounce_ms too small, clamping to 100");
      self.debounce_ms = 100;
    }
    if self.lock_ttl_secs < 60 {
      warn!(lock_ttl_secs = self.lock_ttl_secs, "lock_ttl_secs too small, clamping to 60");
      self.lock_ttl_secs = 60;
    }
    if self.engine_timeout_secs == 0 {
      self.engine_timeout_secs = 600;
    }
  }

  /// Directory where finalized parts are written.
  pub fn parts_dir(&self) -> PathBuf {
    self.data_dir.join("conversations")
  }

  /// Path of the persisted session-state file.
  pub fn state_path(&self) -> PathBuf {
    self.parts_dir().join("state.json")
  }

  pub fn idle_flush(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.idle_flush_secs)
  }

  pub fn debounce(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.debounce_ms)
  }

  pub fn lock_ttl(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.lock_ttl_secs)
  }

  pub fn engine_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.engine_timeout_secs)
  }
}
