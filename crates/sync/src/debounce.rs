//! Trailing-edge debounce for filesystem change bursts.
//!
//! A save in most editors produces several notify events within
//! milliseconds; running a pass per event would thrash the detector. The
//! debouncer collapses a burst into one firing: each notification pushes the
//! deadline out by the full window, and the pass runs only once the window
//! elapses with no further events.
//!
//! This is a pure state machine so it can be unit tested without a runtime;
//! the service loop drives it with `tokio::time::sleep_until`.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
  window: Duration,
  deadline: Option<Instant>,
}

impl Debouncer {
  pub fn new(window: Duration) -> Self {
    Self { window, deadline: None }
  }

  /// Record a change event at `now`, (re)arming the timer.
  pub fn notify(&mut self, now: Instant) {
    self.deadline = Some(now + self.window);
  }

  /// The instant the pending burst fires, if one is armed.
  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Consume an elapsed deadline. Returns true exactly once per burst.
  pub fn fired(&mut self, now: Instant) -> bool {
    match self.deadline {
      Some(deadline) if now >= deadline => {
        self.deadline = None;
        true
      }
      _ => false,
    }
  }
}
