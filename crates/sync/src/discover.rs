//! Session discovery and classification.
//!
//! Scans the sessions directory and splits files into archived (closed,
//! immutable) and active (still growing) sessions based purely on naming
//! convention plus content. Ordering uses the logical start time embedded in
//! the first parseable record, never filesystem mtime: session files get
//! copied between machines and mtimes lie.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  sync::LazyLock,
};

use chrono::{DateTime, Utc};
use memsync_core::SessionId;
use regex::Regex;
use tracing::{debug, warn};

/// Matches `<id>.jsonl`, `<id>.jsonl.archived`, and
/// `<id>.jsonl.archived.<marker>`.
static SESSION_FILENAME_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(?P<id>.+?)\.jsonl(?:\.archived(?:\.(?P<marker>.+))?)?$").unwrap());

/// Primary sessions have bare-UUID identifiers; anything else (sub-agent and
/// tool sessions carry decorated names) is non-primary.
static PRIMARY_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});

/// How many leading records to scan for a parseable timestamp before giving
/// up on a file.
const HEADER_SCAN_LINES: usize = 100;

/// Whether a discovered file is still being appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
  Active,
  Archived { marker: Option<String> },
}

/// One session file found in the sessions directory.
#[derive(Debug, Clone)]
pub struct DiscoveredSession {
  pub id: SessionId,
  pub path: PathBuf,
  /// Full file name, used as the archive identifier (name + rotation marker).
  pub file_name: String,
  pub kind: SessionKind,
  /// Timestamp of the first parseable record.
  pub started_at: DateTime<Utc>,
}

impl DiscoveredSession {
  pub fn is_archived(&self) -> bool {
    matches!(self.kind, SessionKind::Archived { .. })
  }
}

/// Result of one directory scan, each list sorted ascending by
/// (start time, id).
#[derive(Debug, Default)]
pub struct Discovery {
  pub archived: Vec<DiscoveredSession>,
  pub active: Vec<DiscoveredSession>,
  /// Files skipped because no record yielded a timestamp.
  pub skipped_unparseable: usize,
}

/// Parse a session file name into (session id, kind).
///
/// Returns `None` for files that are not session logs at all.
pub fn parse_file_name(name: &str) -> Option<(String, SessionKind)> {
  let caps = SESSION_FILENAME_RE.captures(name)?;
  let id = caps.name("id")?.as_str().to_string();

  // The lazy `.+?` stem means plain `<id>.jsonl` never contains ".jsonl"
  // itself; an archived name always has the ".jsonl.archived" infix.
  let kind = if name.ends_with(".jsonl") {
    SessionKind::Active
  } else {
    SessionKind::Archived {
      marker: caps.name("marker").map(|m| m.as_str().to_string()),
    }
  };
  Some((id, kind))
}

/// Whether an identifier matches the primary-session shape.
pub fn is_primary_id(id: &str) -> bool {
  PRIMARY_ID_RE.is_match(id)
}

/// Enumerate session files under `dir`.
///
/// Archived files already in `processed` are excluded. Non-primary sessions
/// are excluded unless `include_non_primary`. Files with no parseable header
/// record are skipped with a warning, never fatal.
pub fn discover(
  dir: &Path,
  include_non_primary: bool,
  processed: &BTreeSet<String>,
) -> std::io::Result<Discovery> {
  let mut discovery = Discovery::default();

  for entry in std::fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if !entry.file_type()?.is_file() {
      continue;
    }

    let file_name = entry.file_name().to_string_lossy().to_string();
    let Some((id, kind)) = parse_file_name(&file_name) else {
      continue;
    };

    if !include_non_primary && !is_primary_id(&id) {
      debug!(file = %file_name, "Skipping non-primary session");
      continue;
    }

    if matches!(kind, SessionKind::Archived { .. }) && processed.contains(&file_name) {
      debug!(file = %file_name, "Archive already processed");
      continue;
    }

    let Some(started_at) = read_start_time(&path) else {
      warn!(file = %file_name, "No parseable record with a timestamp, skipping");
      discovery.skipped_unparseable += 1;
      continue;
    };

    let session = DiscoveredSession {
      id: SessionId(id),
      path,
      file_name,
      kind: kind.clone(),
      started_at,
    };

    match kind {
      SessionKind::Active => discovery.active.push(session),
      SessionKind::Archived { .. } => discovery.archived.push(session),
    }
  }

  // Lexical id tie-break keeps the ordering reproducible when two sessions
  // share a start time.
  let by_start = |a: &DiscoveredSession, b: &DiscoveredSession| {
    a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id))
  };
  discovery.archived.sort_by(by_start);
  discovery.active.sort_by(by_start);

  Ok(discovery)
}

/// Extract the logical start time: the `timestamp` field of the first
/// parseable record that carries one.
fn read_start_time(path: &Path) -> Option<DateTime<Utc>> {
  use std::io::BufRead;

  let file = std::fs::File::open(path).ok()?;
  let reader = std::io::BufReader::new(file);

  for line in reader.lines().take(HEADER_SCAN_LINES) {
    let Ok(line) = line else { break };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
      continue;
    };
    if let Some(ts) = value.get("timestamp").and_then(|t| t.as_str())
      && let Ok(parsed) = DateTime::parse_from_rfc3339(ts)
    {
      return Some(parsed.with_timezone(&Utc));
    }
  }
  None
}
