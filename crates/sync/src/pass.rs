//! One ingestion pass over the sessions directory.
//!
//! A pass is strictly sequential: pending engine handoffs are retried first,
//! then archived sessions oldest-first, then active sessions oldest-first.
//! Archived files are strictly older than anything still growing, so they
//! must reach the engine first to keep chronological order.
//!
//! A per-session failure is recorded in the report and never aborts the
//! pass; state-store failures do abort, since nothing further can be
//! committed safely. The caller holds the pass lock.

use std::{sync::Arc, time::SystemTime};

use memsync_core::{SessionId, config::SyncConfig};
use tracing::{debug, info, warn};

use crate::{
  detect::{self, ChangeClass},
  discover::{self, DiscoveredSession},
  engine::{ExtractionEngine, ingest_with_timeout},
  error::SyncError,
  parse,
  stage::{self, TailStage},
  state::{Checkpoint, SessionState},
};

/// One failed session within an otherwise-completed pass.
#[derive(Debug)]
pub struct SessionFailure {
  pub session: SessionId,
  pub message: String,
}

/// Summary of one pass.
#[derive(Debug, Default)]
pub struct PassReport {
  /// The pass never ran because another worker held the lock.
  pub skipped: bool,
  pub sessions_seen: usize,
  pub archives_processed: usize,
  pub parts_finalized: usize,
  pub parts_ingested: usize,
  /// Messages left staged (below the part threshold) after this pass.
  pub messages_staged: usize,
  pub malformed_lines: usize,
  pub filtered_records: usize,
  pub failures: Vec<SessionFailure>,
}

impl PassReport {
  pub fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Run one full ingestion pass.
pub async fn run_pass(
  config: &SyncConfig,
  engine: &Arc<dyn ExtractionEngine>,
  force_flush: bool,
) -> Result<PassReport, SyncError> {
  let parts_dir = config.parts_dir();
  std::fs::create_dir_all(&parts_dir).map_err(|e| SyncError::io(parts_dir.clone(), e))?;

  let state_path = config.state_path();
  let state = SessionState::load(&state_path)?;

  let mut pass = Pass {
    config,
    engine,
    parts_dir,
    state_path,
    state,
    report: PassReport::default(),
  };

  pass.retry_pending().await?;

  let discovery = discover::discover(
    &config.sessions_dir,
    config.include_non_primary,
    &pass.state.processed_archives,
  )
  .map_err(|e| SyncError::io(config.sessions_dir.clone(), e))?;

  info!(
    archived = discovery.archived.len(),
    active = discovery.active.len(),
    force_flush,
    "Starting pass"
  );

  for session in &discovery.archived {
    pass.run_session(session, true, force_flush).await?;
  }
  for session in &discovery.active {
    pass.run_session(session, false, force_flush).await?;
  }

  info!(
    sessions = pass.report.sessions_seen,
    archives = pass.report.archives_processed,
    finalized = pass.report.parts_finalized,
    ingested = pass.report.parts_ingested,
    failures = pass.report.failures.len(),
    "Pass complete"
  );
  Ok(pass.report)
}

struct Pass<'a> {
  config: &'a SyncConfig,
  engine: &'a Arc<dyn ExtractionEngine>,
  parts_dir: std::path::PathBuf,
  state_path: std::path::PathBuf,
  state: SessionState,
  report: PassReport,
}

impl Pass<'_> {
  /// Re-drive parts finalized on an earlier pass whose engine handoff
  /// failed, by reloading the durable part files.
  async fn retry_pending(&mut self) -> Result<(), SyncError> {
    let pending: Vec<String> = self
      .state
      .sessions
      .iter()
      .filter(|(_, cp)| cp.pending_parts() > 0)
      .map(|(id, _)| id.clone())
      .collect();

    for id in pending {
      let session = SessionId::from(id.as_str());
      let Some(cp) = self.state.sessions.get(&id) else { continue };
      let (start, count) = (cp.ingested_parts, cp.part_count);
      debug!(session = %session, pending = count - start, "Retrying pending parts");

      let mut ingested = start;
      while ingested < count {
        let path = stage::part_path(&self.parts_dir, &session, ingested);
        let messages = match stage::read_part_file(&path) {
          Ok(messages) => messages,
          Err(e) => {
            self.fail(&session, format!("reload of pending part {ingested} failed: {e}"));
            break;
          }
        };
        match ingest_with_timeout(self.engine, self.config.engine_timeout(), &session, ingested, &messages).await {
          Ok(()) => {
            ingested += 1;
            self.report.parts_ingested += 1;
          }
          Err(e) => {
            self.fail(&session, format!("engine handoff of part {ingested} failed: {e}"));
            break;
          }
        }
      }

      if ingested != start
        && let Some(cp) = self.state.sessions.get_mut(&id)
      {
        cp.ingested_parts = ingested;
        self.state.save(&self.state_path)?;
      }
    }
    Ok(())
  }

  async fn run_session(&mut self, session: &DiscoveredSession, archived: bool, force_flush: bool) -> Result<(), SyncError> {
    match self.sync_session(session, archived, force_flush).await {
      Ok(()) => Ok(()),
      // Nothing further can be committed once the state store fails.
      Err(e @ SyncError::State(_)) => Err(e),
      Err(e) => {
        self.fail(&session.id, e.to_string());
        Ok(())
      }
    }
  }

  async fn sync_session(
    &mut self,
    session: &DiscoveredSession,
    archived: bool,
    force_flush: bool,
  ) -> Result<(), SyncError> {
    let id = session.id.as_str();
    let io_err = |e: std::io::Error| SyncError::io(session.path.clone(), e);

    let meta = match std::fs::metadata(&session.path) {
      Ok(meta) => meta,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(session = %session.id, "Session file vanished since discovery");
        return Ok(());
      }
      Err(e) => return Err(io_err(e)),
    };

    self.report.sessions_seen += 1;

    let mut cp = self.state.sessions.get(id).cloned().unwrap_or_else(|| Checkpoint {
      file_path: session.path.clone(),
      ..Checkpoint::default()
    });
    let before = cp.clone();

    let class = detect::classify(&session.path, &meta, &cp).map_err(io_err)?;
    let full_reread = class.needs_full_reread();
    if full_reread {
      warn!(session = %session.id, class = ?class, "Non-append change, re-deriving session from scratch");
    }

    let idle = detect::idle_secs(&meta, SystemTime::now()) >= self.config.idle_flush_secs;
    let close_all = archived || force_flush || idle;

    let (start_offset, next_index) = if full_reread { (0, 0) } else { (cp.tail_offset, cp.part_count) };

    // The staged tail is re-derived from the file, so a read is needed for
    // any new bytes and whenever an existing tail is about to close.
    let need_read = full_reread || class == ChangeClass::Append || (close_all && cp.has_staged_tail());

    let outcome = if need_read {
      parse::read_messages(&session.path, start_offset).map_err(io_err)?
    } else {
      parse::ReadOutcome {
        new_offset: cp.last_offset,
        ..parse::ReadOutcome::default()
      }
    };
    self.report.malformed_lines += outcome.malformed_lines;
    self.report.filtered_records += outcome.filtered_records;
    let new_offset = outcome.new_offset;

    let tail = TailStage::new(start_offset, outcome.messages);
    let finalized = stage::finalize_due(
      &self.parts_dir,
      &session.id,
      &tail,
      next_index,
      self.config.max_messages_per_part,
      close_all,
    )
    .map_err(io_err)?;

    self.report.parts_finalized += finalized.parts.len();
    self.report.messages_staged += finalized.remainder;

    let old_part_count = cp.part_count;
    let new_part_count = next_index + finalized.parts.len() as u32;

    if let Some((device, inode)) = detect::file_identity(&meta) {
      cp.device = device;
      cp.inode = inode;
    }
    cp.file_path = session.path.clone();
    cp.last_offset = new_offset;
    cp.last_size = meta.len();
    cp.last_mtime_ms = detect::mtime_millis(&meta);
    cp.part_count = new_part_count;

    if need_read {
      cp.tail_offset = if finalized.remainder == 0 {
        // Nothing staged remains; the tail frontier catches up to the read
        // frontier even when trailing records were all filtered.
        new_offset
      } else {
        finalized
          .new_tail_offset
          .unwrap_or(if full_reread { 0 } else { before.tail_offset })
      };
      cp.head_hash = detect::head_hash(&session.path, cp.last_size).map_err(io_err)?;
      cp.tail_hash = detect::tail_hash(&session.path, cp.last_offset).map_err(io_err)?;
    }

    if full_reread {
      // Re-derived parts supersede the old generation: anything unchanged
      // up front stays ingested, the first changed part onward is re-sent.
      let first_changed = finalized
        .parts
        .iter()
        .position(|p| p.changed)
        .map(|pos| pos as u32)
        .unwrap_or(new_part_count);
      cp.ingested_parts = before.ingested_parts.min(first_changed).min(new_part_count);
      if old_part_count > new_part_count {
        stage::remove_stale_parts(&self.parts_dir, &session.id, new_part_count, old_part_count).map_err(io_err)?;
      }
    }

    // The part writes above plus this checkpoint save are the atomic unit;
    // the engine handoff below is not rolled back into it.
    if cp != before {
      self.state.sessions.insert(id.to_string(), cp.clone());
      self.state.save(&self.state_path)?;
    }

    let mut ingested = cp.ingested_parts;
    while ingested < cp.part_count {
      let messages = match finalized.parts.iter().find(|p| p.index == ingested) {
        Some(part) => part.messages.clone(),
        None => {
          let path = stage::part_path(&self.parts_dir, &session.id, ingested);
          match stage::read_part_file(&path) {
            Ok(messages) => messages,
            Err(e) => {
              self.fail(&session.id, format!("reload of part {ingested} failed: {e}"));
              break;
            }
          }
        }
      };
      match ingest_with_timeout(self.engine, self.config.engine_timeout(), &session.id, ingested, &messages).await {
        Ok(()) => {
          ingested += 1;
          self.report.parts_ingested += 1;
        }
        Err(e) => {
          self.fail(&session.id, format!("engine handoff of part {ingested} failed: {e}"));
          break;
        }
      }
    }

    if ingested != cp.ingested_parts {
      cp.ingested_parts = ingested;
      self.state.sessions.insert(id.to_string(), cp.clone());
      self.state.save(&self.state_path)?;
    }

    if archived && cp.ingested_parts == cp.part_count && !cp.has_staged_tail() {
      info!(
        session = %session.id,
        file = %session.file_name,
        parts = cp.part_count,
        "Archive fully ingested"
      );
      self.state.processed_archives.insert(session.file_name.clone());
      self.state.sessions.remove(id);
      self.state.save(&self.state_path)?;
      self.report.archives_processed += 1;
    }

    Ok(())
  }

  fn fail(&mut self, session: &SessionId, message: String) {
    warn!(session = %session, error = %message, "Session failed, continuing pass");
    self.report.failures.push(SessionFailure {
      session: session.clone(),
      message,
    });
  }
}
