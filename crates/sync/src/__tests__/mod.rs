//! Pipeline integration tests: full passes over real temp directories.

mod helpers;
mod ordering;
mod pipeline;
mod recovery;
