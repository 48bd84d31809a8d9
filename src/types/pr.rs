//! Tracked pull request state.
//!
//! A tracked PR carries its lifecycle status and the set of monitored
//! branches its merge commit has already reached. Only landings are stored;
//! "not yet landed" is the absence of a row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, Sha};

/// The lifecycle status of a tracked pull request.
///
/// `Merged` requires the merge commit, so a merged PR without one cannot be
/// represented. A removed PR is not a status: it is absent from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrStatus {
    /// The PR is still open upstream.
    Open,

    /// The PR was merged; branch landing is tracked from here on.
    Merged {
        /// The commit the merge produced on the base branch.
        merge_commit: Sha,
    },

    /// The PR was closed without merging. Terminal.
    Closed,
}

impl PrStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, PrStatus::Open)
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, PrStatus::Merged { .. })
    }

    /// Returns the merge commit if the PR was merged.
    pub fn merge_commit(&self) -> Option<&Sha> {
        match self {
            PrStatus::Merged { merge_commit } => Some(merge_commit),
            _ => None,
        }
    }

    /// The status name used in the JSON API.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrStatus::Open => "open",
            PrStatus::Merged { .. } => "merged",
            PrStatus::Closed => "closed",
        }
    }
}

/// A pull request as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPr {
    pub number: PrNumber,

    pub title: String,

    pub author: String,

    #[serde(flatten)]
    pub status: PrStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// When the poller last got an answer from GitHub about this PR.
    ///
    /// Absent in schema version 1 snapshots.
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Branches the merge commit has reached, with the time the landing was
    /// first observed. Entries are never removed or re-timestamped.
    #[serde(default)]
    pub landed: BTreeMap<String, DateTime<Utc>>,
}

impl TrackedPr {
    /// Creates a freshly tracked, open PR with no landings.
    pub fn new(
        number: PrNumber,
        title: impl Into<String>,
        author: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        TrackedPr {
            number,
            title: title.into(),
            author: author.into(),
            status: PrStatus::Open,
            created_at: now,
            updated_at: now,
            last_checked_at: None,
            landed: BTreeMap::new(),
        }
    }

    pub fn is_landed(&self, branch: &str) -> bool {
        self.landed.contains_key(branch)
    }

    /// Returns true if every given branch has a landing row.
    pub fn all_landed<S: AsRef<str>>(&self, branches: &[S]) -> bool {
        branches.iter().all(|b| self.is_landed(b.as_ref()))
    }

    /// Landing status for each monitored branch, in configuration order.
    ///
    /// Rows for branches that are no longer monitored are not reported.
    pub fn branch_statuses<S: AsRef<str>>(&self, monitored: &[S]) -> Vec<BranchStatus> {
        monitored
            .iter()
            .map(|branch| {
                let branch = branch.as_ref();
                let landed_at = self.landed.get(branch).copied();
                BranchStatus {
                    branch: branch.to_string(),
                    landed: landed_at.is_some(),
                    landed_at,
                }
            })
            .collect()
    }

    /// Builds the API representation of this PR.
    pub fn view<S: AsRef<str>>(&self, monitored: &[S]) -> PrView {
        PrView {
            pr_number: self.number,
            title: self.title.clone(),
            author: self.author.clone(),
            status: self.status.as_str(),
            merge_commit: self
                .status
                .merge_commit()
                .map(|sha| sha.to_string())
                .unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_checked_at: self.last_checked_at,
            branches: self.branch_statuses(monitored),
        }
    }
}

/// Landing status of one monitored branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub branch: String,
    pub landed: bool,
    pub landed_at: Option<DateTime<Utc>>,
}

/// JSON shape returned by the HTTP API for a tracked PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrView {
    pub pr_number: PrNumber,
    pub title: String,
    pub author: String,
    pub status: &'static str,
    /// Empty unless the PR is merged.
    pub merge_commit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub branches: Vec<BranchStatus>,
}
