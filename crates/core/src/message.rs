//! Core domain types for session ingestion.

use serde::{Deserialize, Serialize};

/// Unique identifier for a conversation session, derived from the session
/// file name.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for SessionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<String> for SessionId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl From<&str> for SessionId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Speaker role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

impl std::fmt::Display for Role {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Role::User => write!(f, "user"),
      Role::Assistant => write!(f, "assistant"),
    }
  }
}

/// A single filtered, cleaned conversation message.
///
/// This is the unit handed to the extraction engine; tool calls, thinking
/// blocks, and system-injected records never become `MessageRecord`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
  pub role: Role,
  pub content: String,
}

impl MessageRecord {
  pub fn new(role: Role, content: impl Into<String>) -> Self {
    Self {
      role,
      content: content.into(),
    }
  }
}
