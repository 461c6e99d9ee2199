//! memsync CLI - incremental ingestion of agent session logs

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{cmd_status, cmd_sync, cmd_watch};
use logging::{init_cli_logging, init_watch_logging};

#[derive(Parser)]
#[command(name = "memsync")]
#[command(about = "Incremental ingestion of agent session logs into a memory store")]
#[command(after_help = "\
QUICK START:
  memsync sync                    # Run one ingestion pass now
  memsync watch                   # Ingest continuously on file changes
  memsync flush                   # Finalize staged tails immediately
  memsync status                  # Show checkpoints and pending parts

DIRECTORIES:
  Sessions default to ~/.agent/sessions (MEMSYNC_SESSIONS_DIR overrides).
  Data defaults to the XDG data dir (MEMSYNC_DATA_DIR overrides); config is
  read from memsync.toml inside it.")]
struct Cli {
  /// Data directory holding state, finalized parts, and memsync.toml
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Directory containing session JSONL files
  #[arg(long, global = true)]
  sessions_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one ingestion pass
  Sync {
    /// Also finalize tails below the batch threshold
    #[arg(long)]
    force: bool,
  },
  /// Finalize every staged tail immediately (same as sync --force)
  Flush,
  /// Watch the sessions directory and ingest on change
  Watch,
  /// Summarize checkpoints, staged tails, and pending parts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Watch mode also logs to a rolling file; one-shot commands log to console.
  let _guard = match &cli.command {
    Commands::Watch => init_watch_logging(cli.data_dir.clone()),
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Sync { force } => cmd_sync(cli.data_dir, cli.sessions_dir, force).await,
    Commands::Flush => cmd_sync(cli.data_dir, cli.sessions_dir, true).await,
    Commands::Watch => cmd_watch(cli.data_dir, cli.sessions_dir).await,
    Commands::Status => cmd_status(cli.data_dir, cli.sessions_dir).await,
  }
}
