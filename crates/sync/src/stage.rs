//! Tail staging and part finalization.
//!
//! Newly observed messages accumulate in a [`TailStage`] that exists only
//! for the duration of a pass; it is re-derived from the source file next
//! time, so nothing here needs separate durability. Finalization freezes a
//! chunk of the tail into an immutable, numbered part file written through
//! an atomic rename: a crash mid-write never leaves a half-written part
//! visible to the extraction engine.

use std::path::{Path, PathBuf};

use memsync_core::{MessageRecord, SessionId};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::parse::ParsedMessage;

/// The mutable, not-yet-finalized accumulation for one session.
#[derive(Debug, Default)]
pub struct TailStage {
  /// Ordered accepted messages with their source end offsets.
  pub messages: Vec<ParsedMessage>,
  /// Offset the tail was (re)derived from.
  pub base_offset: u64,
}

impl TailStage {
  pub fn new(base_offset: u64, messages: Vec<ParsedMessage>) -> Self {
    Self { messages, base_offset }
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }
}

/// A frozen, numbered batch of messages, already durable on disk.
#[derive(Debug)]
pub struct FinalizedPart {
  pub index: u32,
  pub path: PathBuf,
  pub messages: Vec<MessageRecord>,
  /// False when an identical part file already existed (full-reread paths
  /// re-derive parts; unchanged ones are byte-identical no-ops).
  pub changed: bool,
}

/// Outcome of a finalization check.
#[derive(Debug, Default)]
pub struct FinalizeOutcome {
  pub parts: Vec<FinalizedPart>,
  /// Messages left staged (empty when the tail was closed in full).
  pub remainder: usize,
  /// Byte offset after the last finalized message; the new checkpoint
  /// `tail_offset`. Unchanged when nothing finalized.
  pub new_tail_offset: Option<u64>,
}

/// Path of a numbered part file: `<id>.part000.json`.
pub fn part_path(parts_dir: &Path, session: &SessionId, index: u32) -> PathBuf {
  parts_dir.join(format!("{session}.part{index:03}.json"))
}

/// Finalize due chunks of `stage` into parts numbered from `next_index`.
///
/// Full chunks of `max_messages` always close; the remainder closes only
/// when `close_all` is set (idle timeout, force flush, or an archived file).
pub fn finalize_due(
  parts_dir: &Path,
  session: &SessionId,
  stage: &TailStage,
  next_index: u32,
  max_messages: usize,
  close_all: bool,
) -> std::io::Result<FinalizeOutcome> {
  let mut outcome = FinalizeOutcome::default();
  let mut index = next_index;
  let mut cursor = 0usize;

  while stage.messages.len() - cursor >= max_messages {
    let chunk = &stage.messages[cursor..cursor + max_messages];
    outcome.parts.push(write_chunk(parts_dir, session, index, chunk)?);
    outcome.new_tail_offset = Some(chunk[chunk.len() - 1].end_offset);
    cursor += max_messages;
    index += 1;
  }

  if close_all && cursor < stage.messages.len() {
    let chunk = &stage.messages[cursor..];
    outcome.parts.push(write_chunk(parts_dir, session, index, chunk)?);
    outcome.new_tail_offset = Some(chunk[chunk.len() - 1].end_offset);
    cursor = stage.messages.len();
  }

  outcome.remainder = stage.messages.len() - cursor;
  Ok(outcome)
}

fn write_chunk(
  parts_dir: &Path,
  session: &SessionId,
  index: u32,
  chunk: &[ParsedMessage],
) -> std::io::Result<FinalizedPart> {
  let messages: Vec<MessageRecord> = chunk.iter().map(|m| m.record.clone()).collect();
  let path = part_path(parts_dir, session, index);
  let changed = write_part_file(&path, &messages)?;
  if changed {
    debug!(session = %session, part = index, messages = messages.len(), "Finalized part");
  }
  Ok(FinalizedPart {
    index,
    path,
    messages,
    changed,
  })
}

/// Write a part file atomically, skipping the write when the existing
/// content is byte-identical. Returns whether the file changed.
pub fn write_part_file(path: &Path, messages: &[MessageRecord]) -> std::io::Result<bool> {
  let encoded = serde_json::to_vec_pretty(messages).expect("message serialization cannot fail");

  if let Ok(existing) = std::fs::read(path)
    && Sha256::digest(&existing) == Sha256::digest(&encoded)
  {
    return Ok(false);
  }

  let tmp = path.with_extension("json.tmp");
  std::fs::write(&tmp, &encoded)?;
  std::fs::rename(&tmp, path)?;
  Ok(true)
}

/// Load a previously finalized part (for retrying a pending engine handoff).
pub fn read_part_file(path: &Path) -> std::io::Result<Vec<MessageRecord>> {
  let content = std::fs::read(path)?;
  serde_json::from_slice(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Delete part files in `[from, to)` left over from a superseded generation
/// after a full reread produced fewer parts.
pub fn remove_stale_parts(parts_dir: &Path, session: &SessionId, from: u32, to: u32) -> std::io::Result<()> {
  for index in from..to {
    let path = part_path(parts_dir, session, index);
    match std::fs::remove_file(&path) {
      Ok(()) => debug!(session = %session, part = index, "Removed stale part"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
  }
  Ok(())
}
