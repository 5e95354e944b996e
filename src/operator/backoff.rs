//! # Watch Backoff
//!
//! Reconnect pacing for the namespace and AzureIdentityBinding watch loops.
//! The delay grows along a Fibonacci progression, which recovers faster than
//! exponential backoff after a transient apiserver hiccup, and snaps back to
//! the minimum once the stream delivers events again.

use std::time::Duration;

use crate::constants::{WATCH_BACKOFF_MAX_SECS, WATCH_BACKOFF_MIN_SECS};

/// Reconnect delay tracker for one watch loop
///
/// Bounded by [`WATCH_BACKOFF_MIN_SECS`] and [`WATCH_BACKOFF_MAX_SECS`].
#[derive(Debug)]
pub struct WatchBackoff {
    previous_secs: u64,
    delay_secs: u64,
}

impl WatchBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self {
            previous_secs: 0,
            delay_secs: WATCH_BACKOFF_MIN_SECS,
        }
    }

    /// Delay to sleep before the next reconnect attempt; each call grows
    /// the following delay until the cap is reached
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_secs;

        let grown = self.previous_secs + self.delay_secs;
        self.previous_secs = self.delay_secs;
        self.delay_secs = grown.min(WATCH_BACKOFF_MAX_SECS);

        Duration::from_secs(delay)
    }

    /// Snap back to the minimum delay after the watch delivered an event
    pub fn note_healthy(&mut self) {
        self.previous_secs = 0;
        self.delay_secs = WATCH_BACKOFF_MIN_SECS;
    }
}

impl Default for WatchBackoff {
    fn default() -> Self {
        Self::new()
    }
}
