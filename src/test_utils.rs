//! Shared test utilities: a scripted GitHub and PR fixtures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use crate::github::{GitHubApi, GitHubApiError, PrData, UpstreamState};
use crate::types::{PrNumber, Sha};

/// An in-memory GitHub.
///
/// PRs and branch contents are set up front and may be changed between
/// cycles. Errors can be queued per PR or per branch; a queued error is
/// returned by the next matching call instead of the real answer.
#[derive(Default)]
pub struct MockGitHub {
    prs: Mutex<HashMap<PrNumber, PrData>>,
    reachable: Mutex<HashSet<(Sha, String)>>,
    fetch_errors: Mutex<HashMap<PrNumber, VecDeque<GitHubApiError>>>,
    compare_errors: Mutex<HashMap<String, VecDeque<GitHubApiError>>>,
    fetch_calls: AtomicUsize,
    compare_calls: AtomicUsize,
    calls: Mutex<Vec<String>>,
    hang: AtomicBool,
}

impl MockGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pr(&self, pr: PrData) {
        self.prs.lock().unwrap().insert(pr.number, pr);
    }

    /// Makes `sha` reachable from `branch`.
    pub fn land(&self, sha: &str, branch: &str) {
        self.reachable
            .lock()
            .unwrap()
            .insert((Sha::new(sha), branch.to_string()));
    }

    pub fn fail_fetch(&self, pr: PrNumber, err: GitHubApiError) {
        self.fetch_errors
            .lock()
            .unwrap()
            .entry(pr)
            .or_default()
            .push_back(err);
    }

    pub fn fail_compare(&self, branch: &str, err: GitHubApiError) {
        self.compare_errors
            .lock()
            .unwrap()
            .entry(branch.to_string())
            .or_default()
            .push_back(err);
    }

    /// Makes every subsequent call wait forever.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.fetch_calls() + self.compare_calls()
    }

    /// Every call made, in order, as `fetch #n` or `compare <branch>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

impl GitHubApi for MockGitHub {
    async fn fetch_pr(&self, pr: PrNumber) -> Result<PrData, GitHubApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(format!("fetch {}", pr));
        self.maybe_hang().await;

        let queued = self
            .fetch_errors
            .lock()
            .unwrap()
            .get_mut(&pr)
            .and_then(|q| q.pop_front());
        if let Some(err) = queued {
            return Err(err);
        }

        self.prs
            .lock()
            .unwrap()
            .get(&pr)
            .cloned()
            .ok_or_else(|| not_found(&format!("PR {}", pr)))
    }

    async fn is_commit_in_branch(&self, sha: &Sha, branch: &str) -> Result<bool, GitHubApiError> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(format!("compare {}", branch));
        self.maybe_hang().await;

        let queued = self
            .compare_errors
            .lock()
            .unwrap()
            .get_mut(branch)
            .and_then(|q| q.pop_front());
        if let Some(err) = queued {
            return Err(err);
        }

        Ok(self
            .reachable
            .lock()
            .unwrap()
            .contains(&(sha.clone(), branch.to_string())))
    }
}

// ─── Fixtures ───

pub fn open_pr(number: u64, title: &str, author: &str) -> PrData {
    PrData {
        number: PrNumber(number),
        title: title.to_string(),
        author: author.to_string(),
        state: UpstreamState::Open,
        merged: false,
        merge_commit: None,
    }
}

pub fn merged_pr(number: u64, title: &str, author: &str, sha: &str) -> PrData {
    PrData {
        state: UpstreamState::Closed,
        merged: true,
        merge_commit: Some(Sha::new(sha)),
        ..open_pr(number, title, author)
    }
}

pub fn closed_pr(number: u64, title: &str, author: &str) -> PrData {
    PrData {
        state: UpstreamState::Closed,
        ..open_pr(number, title, author)
    }
}

pub fn not_found(what: &str) -> GitHubApiError {
    GitHubApiError {
        status_code: Some(404),
        ..GitHubApiError::permanent_without_source(format!("{} not found", what))
    }
}

pub fn server_error() -> GitHubApiError {
    GitHubApiError {
        status_code: Some(502),
        ..GitHubApiError::transient_without_source("bad gateway")
    }
}

pub fn rate_limited(reset_at: DateTime<Utc>) -> GitHubApiError {
    GitHubApiError::rate_limited(reset_at)
}
