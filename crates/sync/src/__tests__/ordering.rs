//! Temporal ordering guarantees: archived before active, oldest first.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::helpers::{RecordingEngine, TestContext, UUID_A, UUID_B};
use crate::{engine::ExtractionEngine, pass::run_pass};

#[tokio::test]
async fn test_archived_reaches_engine_before_active() {
  let ctx = TestContext::new(10);
  // Active session is lexically first and newest; the archive must still win.
  ctx.write_session(
    &format!("{UUID_A}.jsonl"),
    "2024-06-01T00:00:00Z",
    &[("user", "live question"), ("assistant", "live answer")],
  );
  ctx.write_session(
    &format!("{UUID_B}.jsonl.archived"),
    "2024-01-01T00:00:00Z",
    &[("user", "old question"), ("assistant", "old answer")],
  );

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  // Force flush so the active tail finalizes in the same pass.
  run_pass(&ctx.config, &engine, true).await.unwrap();

  let sessions: Vec<String> = recording.calls().into_iter().map(|(s, _, _)| s).collect();
  assert_eq!(sessions, vec![UUID_B.to_string(), UUID_A.to_string()]);
}

#[tokio::test]
async fn test_archives_ordered_by_start_time_not_name() {
  let ctx = TestContext::new(10);
  // UUID_A sorts before UUID_B lexically, but started later.
  ctx.write_session(
    &format!("{UUID_A}.jsonl.archived"),
    "2024-03-01T00:00:00Z",
    &[("user", "later")],
  );
  ctx.write_session(
    &format!("{UUID_B}.jsonl.archived"),
    "2024-01-01T00:00:00Z",
    &[("user", "earlier")],
  );

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  run_pass(&ctx.config, &engine, false).await.unwrap();

  let sessions: Vec<String> = recording.calls().into_iter().map(|(s, _, _)| s).collect();
  assert_eq!(sessions, vec![UUID_B.to_string(), UUID_A.to_string()]);
}

#[tokio::test]
async fn test_parts_of_one_session_arrive_in_index_order() {
  let ctx = TestContext::new(2);
  ctx.write_session(
    &format!("{UUID_A}.jsonl.archived"),
    "2024-01-01T00:00:00Z",
    &[
      ("user", "m1"),
      ("assistant", "m2"),
      ("user", "m3"),
      ("assistant", "m4"),
      ("user", "m5"),
    ],
  );

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  run_pass(&ctx.config, &engine, false).await.unwrap();

  let indices: Vec<u32> = recording.calls().into_iter().map(|(_, i, _)| i).collect();
  assert_eq!(indices, vec![0, 1, 2]);
}
