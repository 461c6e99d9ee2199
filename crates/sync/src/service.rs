//! Owning service for one data directory.
//!
//! Holds config, the engine handle, and the lock path; every pass flows
//! through here. Watch mode runs one bootstrap pass (changes from before
//! startup must not be missed), then loops on watcher events through the
//! debouncer until cancelled.

use std::{
  path::PathBuf,
  sync::Arc,
  time::Instant,
};

use memsync_core::config::SyncConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
  debounce::Debouncer,
  engine::{self, ExtractionEngine},
  error::SyncError,
  lock::{self, PassLock},
  pass::{self, PassReport},
  state::SessionState,
  watcher::SessionWatcher,
};

/// A request to run a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// A session file changed; debounced behind the quiet window.
  Change,
  /// Explicit request; runs immediately, bypassing the quiet window.
  Manual { force_flush: bool },
}

/// Point-in-time summary of the persisted state.
#[derive(Debug, Default)]
pub struct StatusSummary {
  pub sessions: usize,
  /// Sessions with an unfinalized tail staged.
  pub staged_sessions: usize,
  pub total_parts: u32,
  pub ingested_parts: u32,
  /// Parts finalized but not yet accepted by the engine.
  pub pending_parts: u32,
  pub processed_archives: usize,
}

pub struct SyncService {
  config: SyncConfig,
  engine: Arc<dyn ExtractionEngine>,
  lock_path: PathBuf,
}

impl SyncService {
  pub fn new(config: SyncConfig) -> Self {
    let engine = engine::engine_from_config(&config.engine);
    Self::with_engine(config, engine)
  }

  /// Construct with an explicit engine (tests, embedding callers).
  pub fn with_engine(config: SyncConfig, engine: Arc<dyn ExtractionEngine>) -> Self {
    let lock_path = lock::lock_path_for(&config.data_dir);
    Self {
      config,
      engine,
      lock_path,
    }
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  /// Run one pass under the cross-process lock.
  ///
  /// Lock contention yields a report with `skipped` set; the holder's pass
  /// covers the same work.
  pub async fn run_pass(&self, force_flush: bool) -> Result<PassReport, SyncError> {
    let Some(lock) = PassLock::try_acquire(&self.lock_path, self.config.lock_ttl())? else {
      return Ok(PassReport::skipped());
    };

    let result = pass::run_pass(&self.config, &self.engine, force_flush).await;
    lock.release()?;
    result
  }

  /// Summarize persisted state without running a pass.
  pub fn status(&self) -> Result<StatusSummary, SyncError> {
    let state = SessionState::load(&self.config.state_path())?;

    let mut summary = StatusSummary {
      sessions: state.sessions.len(),
      processed_archives: state.processed_archives.len(),
      ..StatusSummary::default()
    };
    for cp in state.sessions.values() {
      if cp.has_staged_tail() {
        summary.staged_sessions += 1;
      }
      summary.total_parts += cp.part_count;
      summary.ingested_parts += cp.ingested_parts;
      summary.pending_parts += cp.pending_parts();
    }
    Ok(summary)
  }

  /// Watch the sessions directory until cancelled.
  pub async fn watch(&self, cancel: CancellationToken) -> Result<(), SyncError> {
    let (tx, rx) = mpsc::channel(16);
    // Held so the trigger channel never reads as closed.
    let _manual = tx;
    self.watch_with_triggers(cancel, rx).await
  }

  /// Watch with an external trigger channel for manual pass requests.
  pub async fn watch_with_triggers(
    &self,
    cancel: CancellationToken,
    mut triggers: mpsc::Receiver<SyncTrigger>,
  ) -> Result<(), SyncError> {
    if let Err(e) = self.run_pass(false).await {
      // Keep watching: the bootstrap failure is retried on the next change.
      error!(error = %e, "Bootstrap pass failed");
    }

    let mut watcher = SessionWatcher::new(&self.config.sessions_dir)?;
    let mut debouncer = Debouncer::new(self.config.debounce());
    let mut triggers_open = true;

    info!(dir = %self.config.sessions_dir.display(), "Watch loop running");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Watch loop shutting down");
          return Ok(());
        }

        changed = watcher.recv() => {
          match changed {
            Some(_) => debouncer.notify(Instant::now()),
            None => {
              warn!("Watcher backend stopped, exiting watch loop");
              return Ok(());
            }
          }
        }

        trigger = triggers.recv(), if triggers_open => {
          match trigger {
            Some(SyncTrigger::Change) => debouncer.notify(Instant::now()),
            Some(SyncTrigger::Manual { force_flush }) => {
              self.run_logged(force_flush).await;
            }
            None => triggers_open = false,
          }
        }

        _ = sleep_until(debouncer.deadline()) => {
          if debouncer.fired(Instant::now()) {
            self.run_logged(false).await;
          }
        }
      }
    }
  }

  async fn run_logged(&self, force_flush: bool) {
    match self.run_pass(force_flush).await {
      Ok(report) if report.skipped => {}
      Ok(report) => {
        if !report.failures.is_empty() {
          warn!(failures = report.failures.len(), "Pass completed with session failures");
        }
      }
      Err(e) => error!(error = %e, "Pass failed"),
    }
  }
}

/// Sleep until the deadline, or forever when none is armed.
async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
    None => std::future::pending::<()>().await,
  }
}
