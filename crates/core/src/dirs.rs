//! Default directory resolution.

use std::path::PathBuf;

/// Get the default sessions directory (where the agent writes its JSONL
/// session logs).
///
/// Respects the following environment variables (in order of precedence):
/// 1. MEMSYNC_SESSIONS_DIR - explicit override
/// 2. ~/.agent/sessions - platform default
pub fn default_sessions_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("MEMSYNC_SESSIONS_DIR") {
    return PathBuf::from(dir);
  }

  dirs::home_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(".agent")
    .join("sessions")
}

/// Get the default base path for memsync data.
///
/// Respects the following environment variables (in order of precedence):
/// 1. MEMSYNC_DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("MEMSYNC_DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("memsync");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("memsync")
}
