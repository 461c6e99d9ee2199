//! Command implementations.

use std::path::PathBuf;

use anyhow::Result;
use memsync::{PassReport, SyncService};
use memsync_core::config::SyncConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn build_service(data_dir: Option<PathBuf>, sessions_dir: Option<PathBuf>) -> SyncService {
  let data_dir = data_dir.unwrap_or_else(memsync_core::dirs::default_data_dir);
  let mut config = SyncConfig::load(&data_dir);
  if let Some(dir) = sessions_dir {
    config.sessions_dir = dir;
  }
  SyncService::new(config)
}

pub async fn cmd_sync(data_dir: Option<PathBuf>, sessions_dir: Option<PathBuf>, force: bool) -> Result<()> {
  let service = build_service(data_dir, sessions_dir);
  let report = service.run_pass(force).await?;
  print_report(&report);
  Ok(())
}

pub async fn cmd_watch(data_dir: Option<PathBuf>, sessions_dir: Option<PathBuf>) -> Result<()> {
  let service = build_service(data_dir, sessions_dir);

  let cancel = CancellationToken::new();
  let signal_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Received ctrl-c, shutting down");
      signal_cancel.cancel();
    }
  });

  service.watch(cancel).await?;
  Ok(())
}

pub async fn cmd_status(data_dir: Option<PathBuf>, sessions_dir: Option<PathBuf>) -> Result<()> {
  let service = build_service(data_dir, sessions_dir);
  let summary = service.status()?;
  let config = service.config();

  println!("sessions dir:        {}", config.sessions_dir.display());
  println!("data dir:            {}", config.data_dir.display());
  println!("sessions tracked:    {}", summary.sessions);
  println!("staged tails:        {}", summary.staged_sessions);
  println!("parts finalized:     {}", summary.total_parts);
  println!("parts ingested:      {}", summary.ingested_parts);
  println!("parts pending:       {}", summary.pending_parts);
  println!("processed archives:  {}", summary.processed_archives);
  Ok(())
}

fn print_report(report: &PassReport) {
  if report.skipped {
    println!("skipped: another worker holds the pass lock");
    return;
  }

  println!(
    "pass complete: {} sessions ({} archives), {} parts finalized, {} ingested, {} messages still staged",
    report.sessions_seen,
    report.archives_processed,
    report.parts_finalized,
    report.parts_ingested,
    report.messages_staged
  );
  if report.malformed_lines > 0 || report.filtered_records > 0 {
    println!(
      "  skipped {} malformed lines, filtered {} records",
      report.malformed_lines, report.filtered_records
    );
  }
  for failure in &report.failures {
    println!("  failed {}: {}", failure.session, failure.message);
  }
}
