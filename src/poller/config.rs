//! Polling configuration.
//!
//! # Polling Strategy
//!
//! - **Poll interval**: 5 minutes by default (configurable via `NPT_POLL_INTERVAL`)
//! - **Initial cycle**: runs immediately on startup, then on every tick
//! - **Missed ticks**: delayed, never bursted, so a slow cycle cannot cause
//!   back-to-back cycles

use std::time::Duration;

/// Default poll interval (5 minutes).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Branch monitored when none is configured.
pub const DEFAULT_BRANCH: &str = "nixos-unstable";

/// Configuration for the polling engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Interval between polling cycles.
    pub poll_interval: Duration,

    /// Branches a merged PR must reach before it stops being tracked.
    ///
    /// Order is preserved: branches are checked and reported in this order.
    pub branches: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    /// Creates a `PollConfig` with default values.
    pub fn new() -> Self {
        PollConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            branches: vec![DEFAULT_BRANCH.to_string()],
        }
    }

    /// Replaces the monitored branches.
    ///
    /// Blank entries and duplicates are dropped; an empty result falls back
    /// to [`DEFAULT_BRANCH`], since a PR with nothing to land in would be
    /// removed the moment it merged.
    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cleaned: Vec<String> = Vec::new();
        for branch in branches {
            let branch = branch.as_ref().trim();
            if !branch.is_empty() && !cleaned.iter().any(|b| b == branch) {
                cleaned.push(branch.to_string());
            }
        }
        if cleaned.is_empty() {
            cleaned.push(DEFAULT_BRANCH.to_string());
        }
        self.branches = cleaned;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
