//! The polling state machine.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{CycleOutcome, PollConfig, PollError, TrackError, TrackOutcome};
use crate::events::{Event, EventBus, EventKind};
use crate::github::{GitHubApi, GitHubApiError, PrData, UpstreamState};
use crate::persistence::{SnapshotStore, StoreError};
use crate::types::{PrNumber, PrStatus, Sha, TrackedPr};

/// Drives tracked PRs through their lifecycle.
///
/// A single `Poller` is shared (behind an `Arc`) between the background poll
/// loop and the HTTP handlers, so both see the same rate limit backoff.
pub struct Poller<G> {
    github: G,
    store: Arc<SnapshotStore>,
    bus: Arc<EventBus>,
    config: PollConfig,

    /// Upstream calls are suspended until this time.
    backoff_until: Mutex<Option<DateTime<Utc>>>,
}

impl<G: GitHubApi> Poller<G> {
    pub fn new(github: G, store: Arc<SnapshotStore>, bus: Arc<EventBus>, config: PollConfig) -> Self {
        Poller {
            github,
            store,
            bus,
            config,
            backoff_until: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn github(&self) -> &G {
        &self.github
    }

    /// Monitored branches, in configuration order.
    pub fn branches(&self) -> &[String] {
        &self.config.branches
    }

    // ─── Rate limit backoff ───────────────────────────────────────────────────

    /// Returns the reset time if a backoff is still in effect.
    ///
    /// An expired backoff is cleared.
    pub fn backoff_until(&self) -> Option<DateTime<Utc>> {
        let mut backoff = self
            .backoff_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *backoff {
            Some(reset_at) if reset_at > Utc::now() => Some(reset_at),
            Some(_) => {
                *backoff = None;
                info!("Rate limit backoff expired, resuming GitHub calls");
                None
            }
            None => None,
        }
    }

    /// Suspends upstream calls until `reset_at`. An existing later reset wins.
    pub(super) fn enter_backoff(&self, reset_at: DateTime<Utc>) {
        let mut backoff = self
            .backoff_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let until = match *backoff {
            Some(existing) if existing > reset_at => existing,
            _ => reset_at,
        };
        *backoff = Some(until);
        warn!(reset_at = %until.to_rfc3339(), "GitHub rate limit reached, suspending GitHub calls");
    }

    /// Awaits a GitHub call, racing it against shutdown.
    ///
    /// A rate limit error starts the engine-wide backoff.
    async fn upstream<T>(
        &self,
        shutdown: &CancellationToken,
        call: impl Future<Output = Result<T, GitHubApiError>>,
    ) -> Result<T, PollError> {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(PollError::Cancelled),
            result = call => result,
        };

        result.map_err(|e| {
            if let Some(reset_at) = e.rate_limit_reset() {
                self.enter_backoff(reset_at);
            }
            PollError::GitHub(e)
        })
    }

    // ─── Run loop ─────────────────────────────────────────────────────────────

    /// Polls until `shutdown` is cancelled.
    ///
    /// The first cycle runs immediately. After a rate limited cycle the loop
    /// sleeps until the reset time and then runs a cycle straight away.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            branches = ?self.config.branches,
            "Poller started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once(&shutdown).await {
                CycleOutcome::Completed { .. } => {}
                CycleOutcome::Cancelled => break,
                CycleOutcome::RateLimited { reset_at } => {
                    let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    info!(
                        reset_at = %reset_at.to_rfc3339(),
                        wait_secs = wait.as_secs(),
                        "Waiting for rate limit reset"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    interval.reset_immediately();
                }
            }
        }

        info!("Shutdown signal received, stopping poller");
    }

    // ─── Polling cycle ────────────────────────────────────────────────────────

    /// Runs one polling cycle over every tracked PR.
    ///
    /// PRs are processed one at a time. A failure on one PR is logged and the
    /// cycle moves on; a rate limit ends the cycle and leaves the remaining
    /// PRs for later.
    #[instrument(skip_all)]
    pub async fn poll_once(&self, shutdown: &CancellationToken) -> CycleOutcome {
        if let Some(reset_at) = self.backoff_until() {
            debug!(reset_at = %reset_at.to_rfc3339(), "Rate limit backoff active, skipping cycle");
            return CycleOutcome::RateLimited { reset_at };
        }

        let prs = self.store.list();
        debug!(count = prs.len(), "Starting poll cycle");

        let mut polled = 0;
        for pr in prs {
            if shutdown.is_cancelled() {
                info!(polled, "Poll cycle interrupted by shutdown");
                return CycleOutcome::Cancelled;
            }

            let number = pr.number;
            match self.process_pr(pr, shutdown).await {
                Ok(_) => {}
                Err(PollError::Cancelled) => {
                    info!(pr = %number, "Poll cycle interrupted by shutdown");
                    return CycleOutcome::Cancelled;
                }
                Err(e) => {
                    if let Some(reset_at) = e.rate_limit_reset() {
                        warn!(pr = %number, polled, "Rate limited, deferring remaining PRs");
                        return CycleOutcome::RateLimited { reset_at };
                    }
                    match e {
                        PollError::Store(StoreError::NotFound(_)) => {
                            debug!(pr = %number, "PR removed during poll, skipping")
                        }
                        e => warn!(pr = %number, error = %e, "Failed to poll PR"),
                    }
                }
            }
            polled += 1;
        }

        debug!(polled, "Poll cycle complete");
        CycleOutcome::Completed { polled }
    }

    /// Advances one PR by at most one lifecycle stage (plus branch checks).
    ///
    /// Returns the final row if the PR was removed.
    async fn process_pr(
        &self,
        pr: TrackedPr,
        shutdown: &CancellationToken,
    ) -> Result<Option<TrackedPr>, PollError> {
        match &pr.status {
            PrStatus::Closed => Ok(None),
            PrStatus::Open => {
                let data = self
                    .upstream(shutdown, self.github.fetch_pr(pr.number))
                    .await?;
                self.apply_upstream(&pr, data, shutdown).await
            }
            PrStatus::Merged { merge_commit } => {
                self.check_branches(&pr, merge_commit, shutdown).await?;
                self.remove_if_landed(pr.number)
            }
        }
    }

    /// Applies freshly fetched upstream data to an open PR.
    ///
    /// The status write also stamps `last_checked_at`.
    async fn apply_upstream(
        &self,
        pr: &TrackedPr,
        data: PrData,
        shutdown: &CancellationToken,
    ) -> Result<Option<TrackedPr>, PollError> {
        if data.merged {
            let Some(merge_commit) = data.merge_commit else {
                // GitHub can report the merge before the merge commit exists.
                debug!(pr = %pr.number, "PR merged but merge commit not yet available");
                self.store.touch_checked(pr.number)?;
                return Ok(None);
            };

            let row = self.store.update_status(
                pr.number,
                PrStatus::Merged {
                    merge_commit: merge_commit.clone(),
                },
                &data.title,
                &data.author,
            )?;
            info!(pr = %pr.number, merge_commit = %merge_commit.short(), "PR merged");
            self.bus.publish(&Event::for_pr(EventKind::Merged, &row));

            self.check_branches(&row, &merge_commit, shutdown).await?;
            return self.remove_if_landed(pr.number);
        }

        if data.state == UpstreamState::Closed {
            self.store
                .update_status(pr.number, PrStatus::Closed, &data.title, &data.author)?;
            info!(pr = %pr.number, "PR closed without merging");
            return Ok(None);
        }

        self.store
            .update_status(pr.number, PrStatus::Open, &data.title, &data.author)?;
        Ok(None)
    }

    /// Checks every monitored branch the PR has not landed in yet.
    ///
    /// The first failure stops the remaining checks for this PR. Landings
    /// stamp `last_checked_at` as part of their own write; any compare after
    /// the last landing is covered by a single stamp at the end.
    async fn check_branches(
        &self,
        pr: &TrackedPr,
        merge_commit: &Sha,
        shutdown: &CancellationToken,
    ) -> Result<(), PollError> {
        let mut unstamped = false;
        for branch in &self.config.branches {
            if pr.is_landed(branch) {
                continue;
            }

            let reachable = match self
                .upstream(shutdown, self.github.is_commit_in_branch(merge_commit, branch))
                .await
            {
                Ok(reachable) => reachable,
                Err(PollError::Cancelled) => return Err(PollError::Cancelled),
                Err(e) => {
                    if unstamped {
                        self.store.touch_checked(pr.number)?;
                    }
                    return Err(e);
                }
            };

            if !reachable {
                debug!(pr = %pr.number, branch = %branch, "Not landed yet");
                unstamped = true;
                continue;
            }

            if self.store.mark_branch_landed(pr.number, branch)? {
                info!(pr = %pr.number, branch = %branch, "PR landed in branch");
                self.bus.publish(&Event::landed(pr, branch.as_str()));
                unstamped = false;
            } else {
                unstamped = true;
            }
        }

        if unstamped {
            self.store.touch_checked(pr.number)?;
        }
        Ok(())
    }

    /// Removes the PR if the store confirms it landed in every monitored branch.
    fn remove_if_landed(&self, pr: PrNumber) -> Result<Option<TrackedPr>, PollError> {
        let removed = self.store.remove_if_landed(pr, &self.config.branches)?;
        if let Some(row) = &removed {
            info!(pr = %pr, "PR landed in all branches, no longer tracking");
            self.bus.publish(&Event::for_pr(EventKind::Removed, row));
        }
        Ok(removed)
    }

    // ─── Add / remove ─────────────────────────────────────────────────────────

    /// Starts tracking `pr`.
    ///
    /// The PR is fetched first so that unknown numbers are rejected. A newly
    /// tracked PR is then advanced exactly as a polling cycle would, so a PR
    /// that is already merged (or already landed everywhere) is reported as
    /// such straight away.
    #[instrument(skip_all, fields(pr = %pr))]
    pub async fn track(
        &self,
        pr: PrNumber,
        shutdown: &CancellationToken,
    ) -> Result<TrackOutcome, TrackError> {
        if pr.0 == 0 {
            return Err(TrackError::Invalid("pr_number must be positive".to_string()));
        }

        if let Some(existing) = self.store.get(pr) {
            debug!("PR already tracked");
            return Ok(TrackOutcome::AlreadyTracked(existing));
        }

        if let Some(reset_at) = self.backoff_until() {
            return Err(TrackError::RateLimited { reset_at });
        }

        let data = self.upstream(shutdown, self.github.fetch_pr(pr)).await?;

        if !self.store.add_if_absent(pr, &data.title, &data.author)? {
            let existing = self.store.get(pr).ok_or(StoreError::NotFound(pr))?;
            return Ok(TrackOutcome::AlreadyTracked(existing));
        }
        let row = self.store.get(pr).ok_or(StoreError::NotFound(pr))?;
        info!(title = %row.title, author = %row.author, "Tracking PR");
        self.bus.publish(&Event::for_pr(EventKind::Added, &row));

        // The PR is tracked from here on; anything left undone is picked up
        // by the next cycle.
        match self.apply_upstream(&row, data, shutdown).await {
            Ok(Some(removed)) => return Ok(TrackOutcome::Completed(removed)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Initial status check incomplete"),
        }

        let row = self.store.get(pr).ok_or(StoreError::NotFound(pr))?;
        Ok(TrackOutcome::Added(row))
    }

    /// Stops tracking `pr`. Returns `None` if it was not tracked.
    #[instrument(skip_all, fields(pr = %pr))]
    pub fn untrack(&self, pr: PrNumber) -> Result<Option<TrackedPr>, StoreError> {
        let removed = self.store.remove(pr)?;
        if let Some(row) = &removed {
            info!("PR removed");
            self.bus.publish(&Event::for_pr(EventKind::Removed, row));
        }
        Ok(removed)
    }
}

impl<G> std::fmt::Debug for Poller<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
