//! GitHub API access for the tracker.
//!
//! This module provides the read-only queries the poller needs, backed by the
//! octocrab library.
//!
//! Key features:
//! - Retries with doubling delays for transient failures
//! - Distinguishes transient, permanent and rate-limited failures
//! - Rate limit reset time read from response headers

mod api;
mod client;
mod error;
mod retry;

pub use api::{CompareStatus, GitHubApi, PrData, UpstreamState};
pub use client::{DEFAULT_API_URL, OctocrabClient};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use retry::{TransientRetry, with_transient_retry};
