//! Filesystem watcher over the sessions directory.
//!
//! Bridges notify's sync callback into the async service loop: the callback
//! forwards raw events over a channel with `blocking_send`, and the async
//! side filters them down to session-file paths. Debouncing is the service
//! loop's job; this module only decides which events matter.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{discover, error::SyncError};

/// Watches the sessions directory and yields paths of changed session files.
pub struct SessionWatcher {
  // Held to keep the notify backend alive.
  _watcher: RecommendedWatcher,
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
}

impl SessionWatcher {
  pub fn new(sessions_dir: &Path) -> Result<Self, SyncError> {
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // Runs on notify's thread; drop the event if the channel is full.
        let _ = event_tx.blocking_send(res);
      },
      Config::default(),
    )?;

    // Session files live flat in one directory, no recursion needed.
    watcher.watch(sessions_dir, RecursiveMode::NonRecursive)?;
    info!(dir = %sessions_dir.display(), "Watching sessions directory");

    Ok(Self {
      _watcher: watcher,
      event_rx,
    })
  }

  /// Next changed session-file path. `None` means the watcher backend died.
  pub async fn recv(&mut self) -> Option<PathBuf> {
    while let Some(event) = self.event_rx.recv().await {
      match event {
        Ok(event) => {
          if let Some(path) = relevant_path(&event) {
            debug!(path = %path.display(), kind = ?event.kind, "Session file changed");
            return Some(path);
          }
        }
        Err(e) => {
          warn!(error = %e, "Watcher error");
        }
      }
    }
    None
  }
}

/// First path in the event that names a session file, for event kinds that
/// can change content or visibility.
fn relevant_path(event: &Event) -> Option<PathBuf> {
  match event.kind {
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
    EventKind::Access(_) | EventKind::Any | EventKind::Other => {
      trace!(kind = ?event.kind, "Ignoring event");
      return None;
    }
  }

  event
    .paths
    .iter()
    .find(|path| {
      path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(discover::parse_file_name)
        .is_some()
    })
    .cloned()
}
