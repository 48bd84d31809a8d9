//! The polling engine.
//!
//! The engine drives every tracked PR through its lifecycle:
//!
//! ```text
//! Open ──merged──▶ Merged ──landed in every branch──▶ (removed)
//!   │
//!   └──closed────▶ Closed
//! ```
//!
//! Each cycle loads all tracked PRs and, one at a time, asks GitHub what
//! changed, writes the result through the store and publishes one event per
//! transition. The same logic runs once, synchronously, when a PR is added.
//!
//! # Rate Limiting
//!
//! A rate limit on any call ends the cycle on the spot and suspends all
//! upstream traffic (polling and adds) until the reset time GitHub declared.
//!
//! # Cancellation
//!
//! The shutdown token is checked between PRs and raced against every GitHub
//! call, the poll timer and the backoff wait. A cancelled call writes nothing.

mod config;
mod engine;


pub use config::{DEFAULT_BRANCH, DEFAULT_POLL_INTERVAL, PollConfig};
pub use engine::Poller;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::github::GitHubApiError;
use crate::persistence::StoreError;
use crate::types::{PrNumber, TrackedPr};

/// Errors from advancing a single PR.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancelled by shutdown")]
    Cancelled,
}

impl PollError {
    /// Returns the reset time if this error was a rate limit.
    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        match self {
            PollError::GitHub(e) => e.rate_limit_reset(),
            _ => None,
        }
    }
}

/// How a polling cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every tracked PR was visited.
    Completed {
        /// Number of PRs visited.
        polled: usize,
    },

    /// Shutdown was requested part way through.
    Cancelled,

    /// Upstream quota is exhausted until `reset_at`. Either the cycle hit the
    /// limit, or a backoff was already active and the cycle did nothing.
    RateLimited { reset_at: DateTime<Utc> },
}

/// Errors from adding a PR.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid PR number: {0}")]
    Invalid(String),

    #[error("could not fetch PR from GitHub: {0}")]
    GitHub(#[source] GitHubApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("GitHub API rate limited until {}", reset_at.to_rfc3339())]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("cancelled by shutdown")]
    Cancelled,
}

impl From<PollError> for TrackError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::GitHub(e) => match e.rate_limit_reset() {
                Some(reset_at) => TrackError::RateLimited { reset_at },
                None => TrackError::GitHub(e),
            },
            PollError::Store(e) => TrackError::Store(e),
            PollError::Cancelled => TrackError::Cancelled,
        }
    }
}

/// Result of adding a PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The PR is now tracked; the row reflects its state after the initial
    /// status check.
    Added(TrackedPr),

    /// The PR was already tracked. Nothing changed and no events were sent.
    AlreadyTracked(TrackedPr),

    /// The PR had already landed in every monitored branch and was removed
    /// again on the spot. The row is its final state.
    Completed(TrackedPr),
}

impl TrackOutcome {
    pub fn pr(&self) -> &TrackedPr {
        match self {
            TrackOutcome::Added(pr) | TrackOutcome::AlreadyTracked(pr) | TrackOutcome::Completed(pr) => pr,
        }
    }

    pub fn number(&self) -> PrNumber {
        self.pr().number
    }
}
