//! Byte-accurate session JSONL reading and message filtering.
//!
//! The reader tracks the end offset of every record so the tail stager can
//! place checkpoints between messages. Filtering happens here, before
//! staging, so noise records never skew the part-count threshold or the
//! idle timer.
//!
//! A session record looks like:
//!
//! ```json
//! {"type":"message","timestamp":"...","message":{"role":"user","content":[{"type":"text","text":"..."}]}}
//! ```
//!
//! Only user/assistant text survives: tool results, meta records,
//! system-injected prompts masquerading as user messages, and directive
//! acknowledgements are dropped and counted.

use std::{
  io::{BufRead, BufReader, Seek, SeekFrom},
  path::Path,
  sync::LazyLock,
};

use memsync_core::{MessageRecord, Role};
use regex::Regex;

static RE_NO_REPLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bNO_REPLY\b\W*$").unwrap());
static RE_TOOL_INVOKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Call the tool \w+ with .*\.$").unwrap());
static RE_SYSTEM_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^System:\s*\[").unwrap());

/// Assistant acknowledgements of slash-command directives.
static RE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
  let patterns = [
    r"^Model set to .+\.$",
    r"^Model reset to default .+\.$",
    r"^Thinking level set to .+\.$",
    r"^Thinking disabled\.$",
    r"^Verbose logging (enabled|disabled|set to .+)\.$",
    r"^Reasoning (visibility|stream) (enabled|disabled)\.$",
    r"^Queue mode (set to .+|reset to default)\.$",
    r"^Queue debounce set to .+\.$",
    r"^Auth profile set to .+\.$",
    r"^Current: .+\n\nSwitch: /model",
  ];
  Regex::new(&format!("(?ms){}", patterns.join("|"))).unwrap()
});

static RE_MESSAGE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\[message_id:\s*[a-f0-9-]+\]\s*").unwrap());
static RE_SYSTEM_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^System:\s*\[[^\]]+\][^\n]*\n+").unwrap());
static RE_COMPACTION_LINE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?m)^.*Compacted \([^)]+\).*Context [^\n]+\n*").unwrap());
static RE_MULTI_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// One accepted message plus the byte offset just past its source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
  pub record: MessageRecord,
  /// Absolute offset of the first byte after this record's line.
  pub end_offset: u64,
}

/// Result of reading a file region.
#[derive(Debug, Default)]
pub struct ReadOutcome {
  pub messages: Vec<ParsedMessage>,
  /// Offset after the last fully-consumed line. An incomplete trailing line
  /// (no newline yet) is left unconsumed so a later append re-reads it.
  pub new_offset: u64,
  /// Complete lines that failed to parse as JSON.
  pub malformed_lines: usize,
  /// Parseable records dropped by the content filters.
  pub filtered_records: usize,
}

/// Read session records from `start_offset` to EOF, extracting filtered
/// user/assistant messages.
///
/// Malformed complete lines are skipped and counted, never fatal for the
/// file.
pub fn read_messages(path: &Path, start_offset: u64) -> std::io::Result<ReadOutcome> {
  let mut file = std::fs::File::open(path)?;
  file.seek(SeekFrom::Start(start_offset))?;
  let mut reader = BufReader::new(file);

  let mut outcome = ReadOutcome {
    new_offset: start_offset,
    ..ReadOutcome::default()
  };
  let mut offset = start_offset;
  let mut buf: Vec<u8> = Vec::new();

  loop {
    buf.clear();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
      break;
    }
    offset += n as u64;
    let complete = buf.ends_with(b"\n");

    let entry: serde_json::Value = match serde_json::from_slice(&buf) {
      Ok(entry) => entry,
      Err(_) => {
        if !complete {
          // Mid-write line; do not advance past it.
          break;
        }
        outcome.malformed_lines += 1;
        outcome.new_offset = offset;
        continue;
      }
    };

    outcome.new_offset = offset;

    if entry.get("type").and_then(|t| t.as_str()) != Some("message") {
      continue;
    }

    match filter_entry(&entry) {
      Some(record) => outcome.messages.push(ParsedMessage {
        record,
        end_offset: offset,
      }),
      None => outcome.filtered_records += 1,
    }
  }

  Ok(outcome)
}

/// Apply all content filters to a `type == "message"` record.
fn filter_entry(entry: &serde_json::Value) -> Option<MessageRecord> {
  if is_system_injected_entry(entry) {
    return None;
  }

  let msg = entry.get("message")?;
  let role = match msg.get("role").and_then(|r| r.as_str()) {
    Some("user") => Role::User,
    Some("assistant") => Role::Assistant,
    _ => return None,
  };

  let text = extract_text_parts(msg.get("content"));
  if text.is_empty() {
    return None;
  }
  if role == Role::User && is_system_injected_content(&text) {
    return None;
  }
  if role == Role::Assistant && is_directive_response(&text) {
    return None;
  }
  if RE_NO_REPLY.is_match(&text) {
    return None;
  }

  let text = clean_message_text(&text);
  if text.is_empty() {
    return None;
  }

  Some(MessageRecord::new(role, text))
}

/// Structural markers of system-injected records.
fn is_system_injected_entry(entry: &serde_json::Value) -> bool {
  if entry.get("toolUseResult").is_some() || entry.get("sourceToolUseID").is_some() {
    return true;
  }
  entry.get("isMeta").and_then(|m| m.as_bool()).unwrap_or(false)
}

/// Detect system-injected text that masquerades as a user message.
fn is_system_injected_content(text: &str) -> bool {
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return false;
  }

  RE_NO_REPLY.is_match(text)
    || RE_SYSTEM_PREFIX.is_match(trimmed)
    || trimmed.starts_with("This session is being continued")
    || trimmed.contains("A new session was started via /new or /reset")
    || RE_TOOL_INVOKE.is_match(trimmed)
}

/// Whether an assistant message is a directive acknowledgement.
fn is_directive_response(text: &str) -> bool {
  RE_DIRECTIVE.is_match(text.trim())
}

/// Concatenate the plain-text parts of a message content array, ignoring
/// tool calls, thinking blocks, and images.
fn extract_text_parts(content: Option<&serde_json::Value>) -> String {
  let Some(parts) = content.and_then(|c| c.as_array()) else {
    return String::new();
  };

  let texts: Vec<&str> = parts
    .iter()
    .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
    .filter(|t| !t.trim().is_empty())
    .collect();

  texts.join("\n").trim().to_string()
}

/// Strip metadata tags and normalize formatting for memory storage.
fn clean_message_text(text: &str) -> String {
  let text = RE_MESSAGE_ID.replace_all(text, "");
  let text = RE_SYSTEM_LINE.replace_all(&text, "");
  let text = RE_COMPACTION_LINE.replace_all(&text, "");
  let text = RE_MULTI_NEWLINE.replace_all(&text, "\n\n");
  text.trim().to_string()
}
