//! Lifecycle events published by the poller and the HTTP surface.
//!
//! Events are delivered synchronously through an [`EventBus`]. Sinks that do
//! I/O (see [`crate::notifier`]) hand the work off to the runtime themselves.

mod bus;

pub use bus::{EventBus, Handler};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{PrNumber, TrackedPr};

/// What happened to a tracked PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// The PR started being tracked.
    #[serde(rename = "pr_added")]
    Added,

    /// The PR stopped being tracked, either because it landed everywhere or
    /// because it was removed by hand.
    #[serde(rename = "pr_removed")]
    Removed,

    /// The PR was observed merged.
    #[serde(rename = "pr_merged")]
    Merged,

    /// The merge commit was observed in a monitored branch.
    #[serde(rename = "pr_landed_branch")]
    LandedInBranch,
}

impl EventKind {
    /// The wire name of this event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Added => "pr_added",
            EventKind::Removed => "pr_removed",
            EventKind::Merged => "pr_merged",
            EventKind::LandedInBranch => "pr_landed_branch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub pr: PrNumber,
    pub title: String,
    pub author: String,
    /// Set only for [`EventKind::LandedInBranch`].
    pub branch: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Builds an event describing `pr`, stamped with the current time.
    pub fn for_pr(kind: EventKind, pr: &TrackedPr) -> Self {
        Event {
            kind,
            pr: pr.number,
            title: pr.title.clone(),
            author: pr.author.clone(),
            branch: None,
            timestamp: Utc::now(),
        }
    }

    /// Builds a [`EventKind::LandedInBranch`] event for `branch`.
    pub fn landed(pr: &TrackedPr, branch: impl Into<String>) -> Self {
        Event {
            branch: Some(branch.into()),
            ..Event::for_pr(EventKind::LandedInBranch, pr)
        }
    }
}
