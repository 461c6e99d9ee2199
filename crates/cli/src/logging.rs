//! Logging setup for one-shot commands and watch mode.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Console-only logging for one-shot commands.
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

/// Watch-mode logging: console plus a daily-rolling file in the data
/// directory. Falls back to console only when the directory cannot be
/// created.
///
/// The returned guard must be kept alive for the duration of the program.
pub fn init_watch_logging(data_dir: Option<PathBuf>) -> Option<WorkerGuard> {
  let log_dir = data_dir.unwrap_or_else(memsync_core::dirs::default_data_dir);
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let appender = tracing_appender::rolling::daily(&log_dir, "memsync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  let env_filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy();

  tracing_subscriber::registry()
    .with(env_filter)
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  Some(guard)
}
