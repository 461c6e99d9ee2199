//! End-to-end pass behavior: staging, finalization, idempotence, resets.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::helpers::{RecordingEngine, TestContext, UUID_A, UUID_B, session_content};
use crate::{engine::ExtractionEngine, pass::run_pass};

#[tokio::test]
async fn test_archived_finalized_active_stays_staged() {
  let ctx = TestContext::new(10);
  let archived_name = format!("{UUID_A}.jsonl.archived");
  ctx.write_session(
    &archived_name,
    "2024-01-01T00:00:00Z",
    &[("user", "q1"), ("assistant", "a1"), ("user", "q2")],
  );
  ctx.write_session(
    &format!("{UUID_B}.jsonl"),
    "2024-01-02T00:00:00Z",
    &[("user", "hello"), ("assistant", "hi")],
  );

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.archives_processed, 1);
  assert_eq!(report.parts_finalized, 1);
  assert_eq!(report.parts_ingested, 1);
  assert_eq!(report.messages_staged, 2);
  assert!(report.failures.is_empty());

  // The archived file became one closed part despite being below threshold.
  assert!(ctx.part_path(UUID_A, 0).exists());
  assert!(!ctx.part_path(UUID_B, 0).exists());
  assert_eq!(recording.calls(), vec![(UUID_A.to_string(), 0, 3)]);

  let state = ctx.state();
  assert!(state.is_archive_processed(&archived_name));
  assert!(!state.sessions.contains_key(UUID_A));
  let cp = &state.sessions[UUID_B];
  assert_eq!(cp.part_count, 0);
  assert!(cp.has_staged_tail());

  // Second pass with nothing changed is a no-op.
  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.sessions_seen, 1);
  assert_eq!(report.parts_finalized, 0);
  assert_eq!(report.parts_ingested, 0);
  assert_eq!(recording.calls().len(), 1);
  assert_eq!(ctx.state().sessions[UUID_B], state.sessions[UUID_B]);
}

#[tokio::test]
async fn test_append_only_idempotence() {
  let ctx = TestContext::new(10);
  let name = format!("{UUID_A}.jsonl");
  let path = ctx.write_session(&name, "2024-01-01T00:00:00Z", &[("user", "one"), ("assistant", "two")]);

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  run_pass(&ctx.config, &engine, false).await.unwrap();
  ctx.append_turns(&name, &[("user", "three")]);
  run_pass(&ctx.config, &engine, false).await.unwrap();

  let cp = ctx.state().sessions[UUID_A].clone();
  assert_eq!(cp.last_offset, std::fs::metadata(&path).unwrap().len());
  assert_eq!(cp.part_count, 0);

  // Force-flushing closes the remainder exactly once with every message.
  let report = run_pass(&ctx.config, &engine, true).await.unwrap();
  assert_eq!(report.parts_finalized, 1);
  assert_eq!(recording.calls(), vec![(UUID_A.to_string(), 0, 3)]);
  assert!(!ctx.state().sessions[UUID_A].has_staged_tail());

  // And flushing again sends nothing twice.
  let report = run_pass(&ctx.config, &engine, true).await.unwrap();
  assert_eq!(report.parts_finalized, 0);
  assert_eq!(recording.calls().len(), 1);
}

#[tokio::test]
async fn test_count_threshold_closes_full_chunks() {
  let ctx = TestContext::new(2);
  ctx.write_session(
    &format!("{UUID_A}.jsonl"),
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

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_finalized, 2);
  assert_eq!(report.messages_staged, 1);
  assert_eq!(
    recording.calls(),
    vec![(UUID_A.to_string(), 0, 2), (UUID_A.to_string(), 1, 2)]
  );

  let cp = ctx.state().sessions[UUID_A].clone();
  assert_eq!(cp.part_count, 2);
  assert_eq!(cp.ingested_parts, 2);
  assert!(cp.has_staged_tail());
}

#[tokio::test]
async fn test_idle_tail_flushes_only_past_the_window() {
  let ctx = TestContext::new(10);
  let name = format!("{UUID_A}.jsonl");
  let path = ctx.write_session(&name, "2024-01-01T00:00:00Z", &[("user", "q"), ("assistant", "a")]);

  let mtime_secs_ago = |ago: u64| {
    let now = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap()
      .as_secs();
    filetime::FileTime::from_unix_time((now - ago) as i64, 0)
  };

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  // Not yet idle long enough: the tail stays staged.
  filetime::set_file_mtime(&path, mtime_secs_ago(ctx.config.idle_flush_secs - 5)).unwrap();
  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_finalized, 0);
  assert!(ctx.state().sessions[UUID_A].has_staged_tail());

  // Past the window: the remainder finalizes without force.
  filetime::set_file_mtime(&path, mtime_secs_ago(ctx.config.idle_flush_secs + 60)).unwrap();
  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_finalized, 1);
  assert_eq!(recording.calls(), vec![(UUID_A.to_string(), 0, 2)]);
  assert!(!ctx.state().sessions[UUID_A].has_staged_tail());
}

#[tokio::test]
async fn test_truncation_rederives_parts() {
  let ctx = TestContext::new(2);
  let name = format!("{UUID_A}.jsonl");
  let turns = [
    ("user", "m1"),
    ("assistant", "m2"),
    ("user", "m3"),
    ("assistant", "m4"),
  ];
  let path = ctx.write_session(&name, "2024-01-01T00:00:00Z", &turns);

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_finalized, 2);

  // Truncate away the last two messages, keeping the same inode.
  let keep = session_content("2024-01-01T00:00:00Z", &turns[..2]).len() as u64;
  let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
  file.set_len(keep).unwrap();
  drop(file);

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert!(report.failures.is_empty());

  let cp = ctx.state().sessions[UUID_A].clone();
  // Part 0 is content-identical and stays ingested; part 1 is stale.
  assert_eq!(cp.part_count, 1);
  assert_eq!(cp.ingested_parts, 1);
  assert!(ctx.part_path(UUID_A, 0).exists());
  assert!(!ctx.part_path(UUID_A, 1).exists());
  // Nothing was re-sent to the engine.
  assert_eq!(recording.calls().len(), 2);
}

#[tokio::test]
async fn test_non_primary_sessions_excluded_by_default() {
  let ctx = TestContext::new(10);
  ctx.write_session("subagent-worker.jsonl", "2024-01-01T00:00:00Z", &[("user", "hi")]);

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  let report = run_pass(&ctx.config, &engine, true).await.unwrap();
  assert_eq!(report.sessions_seen, 0);
  assert!(ctx.state().sessions.is_empty());
}
