//! GitHub API error types.
//!
//! Errors are categorized for the poller's benefit:
//!
//! - **Transient** errors (5xx, network failures, timeouts) are retried with
//!   backoff inside the client and, if they persist, leave the PR untouched
//!   until the next cycle.
//! - **Permanent** errors (404 and other 4xx, undecodable bodies) are returned
//!   immediately.
//! - **Rate limited** responses carry the reset time GitHub declared. They are
//!   never retried in-call: the poller suspends all upstream traffic until the
//!   reset time instead.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Header carrying the number of requests left in the current window.
pub(crate) const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the window reset time, in epoch seconds.
pub(crate) const HEADER_RATELIMIT_RESET: &str = "x-ratelimit-reset";
/// Header carrying a relative wait in seconds (secondary rate limits).
pub(crate) const HEADER_RETRY_AFTER: &str = "retry-after";

/// Wait applied when GitHub signals exhaustion without saying for how long.
const FALLBACK_RATE_LIMIT_WAIT_SECS: i64 = 60;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - Network failures and request timeouts
    /// - A merged PR whose merge commit has not propagated yet
    Transient,

    /// Permanent error - retrying the same request will not help.
    ///
    /// Examples:
    /// - PR or branch not found (404)
    /// - HTTP 403/429 while quota is still available
    /// - Response bodies that do not decode
    Permanent,

    /// Quota exhausted until `reset_at`.
    RateLimited {
        /// When GitHub will accept requests again.
        reset_at: DateTime<Utc>,
    },
}

impl GitHubErrorKind {
    /// Returns true if this error is retriable in-call.
    ///
    /// Rate limits are not: they are handled by suspending the poller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    /// The kind of error (transient, permanent, or rate limited).
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if a response was received.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let GitHubErrorKind::RateLimited { reset_at } = self.kind {
            return write!(
                f,
                "GitHub API rate limited, resets at {}",
                reset_at.to_rfc3339()
            );
        }
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a transient error from an octocrab error.
    pub fn transient(message: impl Into<String>, source: octocrab::Error) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a rate limit error resetting at `reset_at`.
    pub fn rate_limited(reset_at: DateTime<Utc>) -> Self {
        Self {
            kind: GitHubErrorKind::RateLimited { reset_at },
            status_code: None,
            message: "rate limit exceeded".to_string(),
            source: None,
        }
    }

    /// Categorizes a non-success HTTP response.
    ///
    /// A 403 or 429 is only a rate limit when GitHub also reports zero
    /// remaining quota; otherwise it is an ordinary permission failure.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, context: &str) -> Self {
        let code = status.as_u16();

        if matches!(code, 403 | 429) && quota_exhausted(headers) {
            return Self {
                status_code: Some(code),
                ..Self::rate_limited(reset_time(headers, Utc::now()))
            };
        }

        let kind = if status.is_server_error() {
            GitHubErrorKind::Transient
        } else {
            GitHubErrorKind::Permanent
        };

        Self {
            kind,
            status_code: Some(code),
            message: format!("GitHub API returned {} for {}", code, context),
            source: None,
        }
    }

    /// Categorizes an octocrab transport error.
    ///
    /// Transport errors happen before a status is available. Anything that
    /// looks like a network failure is transient; the rest is permanent.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let kind = if is_network_error(&message) {
            GitHubErrorKind::Transient
        } else {
            GitHubErrorKind::Permanent
        };

        Self {
            kind,
            status_code: None,
            message,
            source: Some(err),
        }
    }

    /// Returns the reset time if this is a rate limit error.
    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            GitHubErrorKind::RateLimited { reset_at } => Some(reset_at),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit_reset().is_some()
    }
}

/// Returns true if `x-ratelimit-remaining` is present and zero.
pub(crate) fn quota_exhausted(headers: &HeaderMap) -> bool {
    remaining_quota(headers) == Some(0)
}

/// Parses `x-ratelimit-remaining`, if present.
pub(crate) fn remaining_quota(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(HEADER_RATELIMIT_REMAINING)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Determines when an exhausted quota resets.
///
/// Prefers the absolute `x-ratelimit-reset`, then the relative `retry-after`,
/// then a fixed one-minute wait.
pub(crate) fn reset_time(headers: &HeaderMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let header_i64 = |name: &str| -> Option<i64> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    };

    if let Some(reset) =
        header_i64(HEADER_RATELIMIT_RESET).and_then(|epoch| DateTime::from_timestamp(epoch, 0))
    {
        return reset;
    }
    if let Some(secs) = header_i64(HEADER_RETRY_AFTER) {
        return now + Duration::seconds(secs.max(0));
    }
    now + Duration::seconds(FALLBACK_RATE_LIMIT_WAIT_SECS)
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
        || message_lower.contains("hyper")
}
