//! Incremental ingestion of agent session logs into a memory store.
//!
//! Session JSONL files are append-mostly: the pipeline discovers them,
//! classifies how each changed since its checkpoint, stages newly observed
//! messages, and finalizes immutable numbered parts that are handed to an
//! extraction engine. Passes are debounced behind filesystem notifications
//! and serialized across processes by a TTL lock.
//!
//! # Architecture
//!
//! ```text
//! watcher ─▶ debounce ─▶ lock ─▶ pass
//!                                 ├─ discover   (archived + active, oldest first)
//!                                 ├─ detect     (none/append/modified/truncated/replaced)
//!                                 ├─ parse      (byte-accurate JSONL + content filters)
//!                                 ├─ stage      (tail buffer → immutable parts)
//!                                 └─ engine     (ingest handoff, retried when pending)
//! ```
//!
//! State is owned by [`SyncService`], constructed once per data directory.

pub mod debounce;
pub mod detect;
pub mod discover;
pub mod engine;
pub mod error;
pub mod lock;
pub mod parse;
pub mod pass;
pub mod stage;
pub mod state;
pub mod watcher;

mod service;

#[cfg(test)]
mod __tests__;

pub use engine::ExtractionEngine;
pub use error::SyncError;
pub use pass::PassReport;
pub use service::{StatusSummary, SyncService, SyncTrigger};
