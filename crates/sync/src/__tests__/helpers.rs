//! Shared helpers for pipeline integration tests.

use std::{
  path::PathBuf,
  sync::{Arc, Mutex},
};

use async_trait::async_trait;
use memsync_core::{MessageRecord, SessionId, config::SyncConfig};
use tempfile::TempDir;

use crate::{engine::ExtractionEngine, error::EngineError, stage, state::SessionState};

pub const UUID_A: &str = "11111111-2222-3333-4444-555555555555";
pub const UUID_B: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

/// Temp sessions + data directories with a config pointing at them.
///
/// Directories are cleaned up on drop.
pub struct TestContext {
  _sessions: TempDir,
  _data: TempDir,
  pub config: SyncConfig,
}

impl TestContext {
  pub fn new(max_messages_per_part: usize) -> Self {
    let sessions = tempfile::tempdir().expect("create sessions dir");
    let data = tempfile::tempdir().expect("create data dir");
    let config = SyncConfig {
      sessions_dir: sessions.path().to_path_buf(),
      data_dir: data.path().to_path_buf(),
      max_messages_per_part,
      ..SyncConfig::default()
    };
    Self {
      _sessions: sessions,
      _data: data,
      config,
    }
  }

  /// Write a session file with a header record and user/assistant turns.
  pub fn write_session(&self, file_name: &str, started_at: &str, turns: &[(&str, &str)]) -> PathBuf {
    let path = self.config.sessions_dir.join(file_name);
    std::fs::write(&path, session_content(started_at, turns)).expect("write session file");
    path
  }

  pub fn append_turns(&self, file_name: &str, turns: &[(&str, &str)]) {
    use std::io::Write;
    let path = self.config.sessions_dir.join(file_name);
    let mut file = std::fs::OpenOptions::new()
      .append(true)
      .open(&path)
      .expect("open session file");
    for (role, text) in turns {
      file.write_all(message_line(role, text).as_bytes()).expect("append turn");
    }
  }

  pub fn state(&self) -> SessionState {
    SessionState::load(&self.config.state_path()).expect("load state")
  }

  pub fn part_path(&self, session: &str, index: u32) -> PathBuf {
    stage::part_path(&self.config.parts_dir(), &SessionId::from(session), index)
  }
}

pub fn message_line(role: &str, text: &str) -> String {
  serde_json::json!({
    "type": "message",
    "timestamp": "2024-01-01T00:00:00Z",
    "message": { "role": role, "content": [{ "type": "text", "text": text }] }
  })
  .to_string()
    + "\n"
}

pub fn session_content(started_at: &str, turns: &[(&str, &str)]) -> String {
  let mut content = serde_json::json!({ "type": "session", "timestamp": started_at }).to_string() + "\n";
  for (role, text) in turns {
    content.push_str(&message_line(role, text));
  }
  content
}

/// Engine that records every handoff, optionally failing the first N calls.
pub struct RecordingEngine {
  /// (session id, part index, message count) per accepted call.
  pub calls: Mutex<Vec<(String, u32, usize)>>,
  failures_left: Mutex<u32>,
}

impl RecordingEngine {
  pub fn new() -> Arc<Self> {
    Self::failing(0)
  }

  pub fn failing(failures: u32) -> Arc<Self> {
    Arc::new(Self {
      calls: Mutex::new(Vec::new()),
      failures_left: Mutex::new(failures),
    })
  }

  pub fn calls(&self) -> Vec<(String, u32, usize)> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl ExtractionEngine for RecordingEngine {
  async fn ingest(&self, session: &SessionId, part_index: u32, messages: &[MessageRecord]) -> Result<(), EngineError> {
    {
      let mut left = self.failures_left.lock().unwrap();
      if *left > 0 {
        *left -= 1;
        return Err(EngineError::Rejected("synthetic failure".into()));
      }
    }
    self
      .calls
      .lock()
      .unwrap()
      .push((session.to_string(), part_index, messages.len()));
    Ok(())
  }
}
