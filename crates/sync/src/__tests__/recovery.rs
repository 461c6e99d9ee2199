//! Failure recovery: pending-part retry, lock contention, engine outages.

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;

use super::helpers::{RecordingEngine, TestContext, UUID_A};
use crate::{
  engine::ExtractionEngine,
  lock::{PassLock, lock_path_for},
  pass::run_pass,
  service::SyncService,
};

#[tokio::test]
async fn test_pending_part_retried_from_disk() {
  let ctx = TestContext::new(10);
  let archived_name = format!("{UUID_A}.jsonl.archived");
  ctx.write_session(
    &archived_name,
    "2024-01-01T00:00:00Z",
    &[("user", "q"), ("assistant", "a")],
  );

  // First handoff fails: the part must stay durable and pending.
  let recording = RecordingEngine::failing(1);
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_finalized, 1);
  assert_eq!(report.parts_ingested, 0);
  assert_eq!(report.failures.len(), 1);
  assert_eq!(report.archives_processed, 0);

  let state = ctx.state();
  assert!(!state.is_archive_processed(&archived_name));
  let cp = &state.sessions[UUID_A];
  assert_eq!(cp.pending_parts(), 1);
  assert!(ctx.part_path(UUID_A, 0).exists());

  // Next pass reloads the part file, ingests it, and completes the archive.
  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  assert_eq!(report.parts_ingested, 1);
  assert_eq!(report.archives_processed, 1);
  assert_eq!(recording.calls(), vec![(UUID_A.to_string(), 0, 2)]);

  let state = ctx.state();
  assert!(state.is_archive_processed(&archived_name));
  assert!(!state.sessions.contains_key(UUID_A));
}

#[tokio::test]
async fn test_engine_failure_never_fails_other_sessions() {
  let ctx = TestContext::new(10);
  ctx.write_session(
    &format!("{UUID_A}.jsonl.archived"),
    "2024-01-01T00:00:00Z",
    &[("user", "first")],
  );
  ctx.write_session(
    "bbbbbbbb-2222-3333-4444-555555555555.jsonl.archived",
    "2024-02-01T00:00:00Z",
    &[("user", "second")],
  );

  let recording = RecordingEngine::failing(1);
  let engine: Arc<dyn ExtractionEngine> = recording.clone();

  let report = run_pass(&ctx.config, &engine, false).await.unwrap();
  // The older archive failed its handoff; the younger one still went through.
  assert_eq!(report.failures.len(), 1);
  assert_eq!(report.archives_processed, 1);
  assert_eq!(recording.calls().len(), 1);
}

#[tokio::test]
async fn test_lock_contention_skips_pass() {
  let ctx = TestContext::new(10);
  ctx.write_session(&format!("{UUID_A}.jsonl"), "2024-01-01T00:00:00Z", &[("user", "hi")]);

  let recording = RecordingEngine::new();
  let engine: Arc<dyn ExtractionEngine> = recording.clone();
  let service = SyncService::with_engine(ctx.config.clone(), engine);

  let lock_path = lock_path_for(&ctx.config.data_dir);
  let held = PassLock::try_acquire(&lock_path, Duration::from_secs(900))
    .unwrap()
    .expect("acquire lock");

  let report = service.run_pass(true).await.unwrap();
  assert!(report.skipped);
  assert_eq!(report.sessions_seen, 0);
  assert!(recording.calls().is_empty());

  held.release().unwrap();
  let report = service.run_pass(true).await.unwrap();
  assert!(!report.skipped);
  assert_eq!(report.sessions_seen, 1);
}
