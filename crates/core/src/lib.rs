//! Shared domain types and configuration for memsync.

pub mod config;
pub mod dirs;
pub mod message;

pub use config::SyncConfig;
pub use message::{MessageRecord, Role, SessionId};
