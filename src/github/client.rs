//! Octocrab client wrapper scoped to a specific repository.
//!
//! Requests go through octocrab's raw `_get` so the response headers stay
//! visible: the rate limit headers decide whether a 403/429 is a quota
//! exhaustion or an ordinary failure. Bodies are decoded with serde into the
//! few fields the tracker needs.

use std::time::Duration;

use octocrab::Octocrab;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{PrNumber, RepoId, Sha};

use super::api::{CompareStatus, GitHubApi, PrData, UpstreamState};
use super::error::{GitHubApiError, remaining_quota};
use super::retry::{TransientRetry, with_transient_retry};

/// Default API root for github.com.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default bound on a single request, including reading the body.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remaining quota below which every response logs a warning.
const LOW_QUOTA_THRESHOLD: u64 = 100;

/// A GitHub API client scoped to a specific repository.
#[derive(Clone)]
pub struct OctocrabClient {
    /// The underlying octocrab client.
    client: Octocrab,

    /// The repository this client is scoped to.
    repo: RepoId,

    /// Upper bound on each individual request.
    request_timeout: Duration,

    /// Retries for transient failures.
    retry: TransientRetry,
}

impl OctocrabClient {
    /// Creates a new client scoped to the given repository.
    pub fn new(client: Octocrab, repo: RepoId) -> Self {
        Self {
            client,
            repo,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: TransientRetry::DEFAULT,
        }
    }

    /// Builds a client against `base_uri`.
    ///
    /// Without a token requests are unauthenticated, which GitHub allows at a
    /// much lower quota. Octocrab's own retry layer is turned off, so every
    /// attempt made here is exactly one request.
    pub fn connect(
        base_uri: &str,
        token: Option<&str>,
        repo: RepoId,
    ) -> Result<Self, octocrab::Error> {
        let builder = Octocrab::builder()
            .base_uri(base_uri)?
            .add_retry_config(octocrab::service::middleware::retry::RetryConfig::None);
        let client = match token {
            Some(token) => builder.personal_token(token.to_string()).build()?,
            None => builder.build()?,
        };
        Ok(Self::new(client, repo))
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets how transient failures are retried within a single call.
    pub fn with_retry(mut self, retry: TransientRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a reference to the underlying octocrab client.
    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    /// Returns the repository this client is scoped to.
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    /// Issues a GET against `path` and decodes the JSON body.
    ///
    /// The whole exchange, body included, is bounded by the request timeout.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        context: &str,
    ) -> Result<T, GitHubApiError> {
        let exchange = async {
            let response = self
                .client
                ._get(path.to_string())
                .await
                .map_err(GitHubApiError::from_octocrab)?;

            let status = response.status();
            let headers = response.headers().clone();

            if let Some(remaining) = remaining_quota(&headers)
                && remaining < LOW_QUOTA_THRESHOLD
            {
                warn!(remaining, "GitHub API rate limit low");
            }

            if !status.is_success() {
                return Err(GitHubApiError::from_response(status, &headers, context));
            }

            let body = self
                .client
                .body_to_string(response)
                .await
                .map_err(|e| GitHubApiError::transient(format!("reading {} response", context), e))?;

            serde_json::from_str(&body).map_err(|e| {
                GitHubApiError::permanent_without_source(format!(
                    "decoding {} response: {}",
                    context, e
                ))
            })
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(GitHubApiError::transient_without_source(format!(
                "{} timed out after {:?}",
                context, self.request_timeout
            ))),
        }
    }

    async fn get_pr_once(&self, pr: PrNumber) -> Result<PrData, GitHubApiError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}",
            self.repo.owner, self.repo.repo, pr.0
        );
        let pull: PullResponse = self.get_json(&path, &format!("PR {}", pr)).await?;

        // GitHub also reports a test-merge SHA for open PRs; only a real merge
        // commit is kept.
        let merge_commit = if pull.merged {
            pull.merge_commit_sha.filter(|s| !s.is_empty()).map(Sha::new)
        } else {
            None
        };

        Ok(PrData {
            number: pr,
            title: pull.title.unwrap_or_default(),
            author: pull.user.map(|u| u.login).unwrap_or_default(),
            state: pull.state,
            merged: pull.merged,
            merge_commit,
        })
    }

    async fn compare_once(&self, sha: &Sha, branch: &str) -> Result<bool, GitHubApiError> {
        let path = format!(
            "/repos/{}/{}/compare/{}...{}",
            self.repo.owner, self.repo.repo, branch, sha
        );
        let compare: CompareResponse = self
            .get_json(&path, &format!("compare {}...{}", branch, sha.short()))
            .await?;

        debug!(
            sha = %sha.short(),
            branch = %branch,
            status = ?compare.status,
            "Compared commit against branch"
        );
        Ok(compare.status.is_reachable())
    }
}

impl GitHubApi for OctocrabClient {
    async fn fetch_pr(&self, pr: PrNumber) -> Result<PrData, GitHubApiError> {
        with_transient_retry(self.retry, "fetch PR", || self.get_pr_once(pr)).await
    }

    async fn is_commit_in_branch(&self, sha: &Sha, branch: &str) -> Result<bool, GitHubApiError> {
        with_transient_retry(self.retry, "compare", || self.compare_once(sha, branch)).await
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("repo", &self.repo)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

// ─── Response Types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PullResponse {
    title: Option<String>,
    user: Option<UserResponse>,
    state: UpstreamState,
    #[serde(default)]
    merged: bool,
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    status: CompareStatus,
}
