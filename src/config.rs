//! Service configuration from environment variables.
//!
//! | Variable              | Default                  |
//! |-----------------------|--------------------------|
//! | `NPT_LISTEN_ADDR`     | `0.0.0.0:8585`           |
//! | `NPT_STATE_PATH`      | `./tracker.json`         |
//! | `NPT_GITHUB_TOKEN`    | unset (unauthenticated)  |
//! | `NPT_WEBHOOK_URL`     | unset (no notifications) |
//! | `NPT_POLL_INTERVAL`   | `5m`                     |
//! | `NPT_BRANCHES`        | `nixos-unstable`         |
//! | `NPT_REPO`            | `NixOS/nixpkgs`          |
//! | `NPT_GITHUB_API_URL`  | `https://api.github.com` |
//! | `NPT_REQUEST_TIMEOUT` | `30s`                    |
//!
//! Durations are read with `humantime` (`90s`, `5m`, `1h30m`, `1h 30m`). An
//! unparseable or zero duration keeps the default and logs a warning. Empty
//! variables count as unset.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::github::DEFAULT_API_URL;
use crate::poller::{DEFAULT_POLL_INTERVAL, PollConfig};
use crate::types::{InvalidRepoId, RepoId};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8585";
const DEFAULT_STATE_PATH: &str = "./tracker.json";
const DEFAULT_REPO: &str = "NixOS/nixpkgs";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid NPT_LISTEN_ADDR {value:?}: {reason}")]
    ListenAddr { value: String, reason: String },

    #[error("invalid NPT_REPO: {0}")]
    Repo(#[from] InvalidRepoId),
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub state_path: PathBuf,
    pub github_token: Option<String>,
    pub webhook_url: Option<String>,
    pub poll_interval: Duration,
    pub branches: Vec<String>,
    pub repo: RepoId,
    pub github_api_url: String,
    pub request_timeout: Duration,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_listen_addr(
            get("NPT_LISTEN_ADDR")
                .as_deref()
                .unwrap_or(DEFAULT_LISTEN_ADDR),
        )?;

        let repo: RepoId = get("NPT_REPO").as_deref().unwrap_or(DEFAULT_REPO).parse()?;

        let branches = PollConfig::new()
            .with_branches(get("NPT_BRANCHES").unwrap_or_default().split(','))
            .branches;

        Ok(Config {
            listen_addr,
            state_path: get("NPT_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            github_token: get("NPT_GITHUB_TOKEN"),
            webhook_url: get("NPT_WEBHOOK_URL"),
            poll_interval: duration_or_default(
                "NPT_POLL_INTERVAL",
                get("NPT_POLL_INTERVAL"),
                DEFAULT_POLL_INTERVAL,
            ),
            branches,
            repo,
            github_api_url: get("NPT_GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            request_timeout: duration_or_default(
                "NPT_REQUEST_TIMEOUT",
                get("NPT_REQUEST_TIMEOUT"),
                DEFAULT_REQUEST_TIMEOUT,
            ),
        })
    }

    /// The polling engine's share of the configuration.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new()
            .with_poll_interval(self.poll_interval)
            .with_branches(&self.branches)
    }
}

/// Parses a listen address. A bare `:port` binds all interfaces.
fn parse_listen_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let candidate = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => value.to_string(),
    };
    candidate.parse().map_err(|e: std::net::AddrParseError| ConfigError::ListenAddr {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn duration_or_default(key: &str, value: Option<String>, default: Duration) -> Duration {
    let Some(value) = value else {
        return default;
    };
    match humantime::parse_duration(value.trim()) {
        Ok(d) if !d.is_zero() => d,
        Ok(_) => {
            warn!(key, value = %value, "Duration must be positive, using default");
            default
        }
        Err(e) => {
            warn!(key, value = %value, error = %e, "Invalid duration, using default");
            default
        }
    }
}
