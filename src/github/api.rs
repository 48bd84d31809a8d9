//! The GitHub operations the tracker depends on.
//!
//! The poller is generic over [`GitHubApi`], so tests can drive it with a
//! scripted fake while production uses [`super::OctocrabClient`].

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;

use crate::types::{PrNumber, Sha};

use super::error::GitHubApiError;

/// The open/closed state GitHub reports for a pull request.
///
/// A merged PR is reported as `Closed` with `merged = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    Open,
    Closed,
}

/// Current upstream status of a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrData {
    pub number: PrNumber,
    pub title: String,
    pub author: String,
    pub state: UpstreamState,
    pub merged: bool,
    /// Populated once merged. GitHub may briefly report `merged = true`
    /// before the merge commit is available.
    pub merge_commit: Option<Sha>,
}

/// Relationship between a commit and a branch, as reported by the compare
/// endpoint for `{branch}...{commit}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareStatus {
    /// The commit is behind the branch: the branch contains it.
    Behind,
    /// The commit and the branch tip are the same commit.
    Identical,
    /// The commit is ahead of the branch: not landed yet.
    Ahead,
    /// Neither contains the other.
    Diverged,
    #[serde(other)]
    Unknown,
}

impl CompareStatus {
    /// Returns true if the branch contains the commit.
    pub fn is_reachable(self) -> bool {
        matches!(self, CompareStatus::Behind | CompareStatus::Identical)
    }
}

/// Read-only GitHub queries used by the poller and the add path.
///
/// Implementations are scoped to a single repository.
pub trait GitHubApi: Send + Sync {
    /// Fetches the current status of a pull request.
    fn fetch_pr(
        &self,
        pr: PrNumber,
    ) -> impl Future<Output = Result<PrData, GitHubApiError>> + Send;

    /// Answers whether `sha` is contained in `branch`.
    fn is_commit_in_branch(
        &self,
        sha: &Sha,
        branch: &str,
    ) -> impl Future<Output = Result<bool, GitHubApiError>> + Send;
}

impl<T: GitHubApi> GitHubApi for Arc<T> {
    fn fetch_pr(
        &self,
        pr: PrNumber,
    ) -> impl Future<Output = Result<PrData, GitHubApiError>> + Send {
        (**self).fetch_pr(pr)
    }

    fn is_commit_in_branch(
        &self,
        sha: &Sha,
        branch: &str,
    ) -> impl Future<Output = Result<bool, GitHubApiError>> + Send {
        (**self).is_commit_in_branch(sha, branch)
    }
}
