//! The tracker's state store.
//!
//! All tracked PRs live in memory behind a mutex and are written through to a
//! JSON snapshot on every change. A mutation is applied to a copy of the
//! state, the copy is persisted, and only then does it replace the in-memory
//! state: a failed write leaves both disk and memory as they were.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use super::snapshot::{
    SnapshotError, TrackerSnapshot, save_snapshot_atomic, try_load_snapshot,
};
use crate::types::{PrNumber, PrStatus, TrackedPr};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// The PR is not tracked.
    #[error("PR {0} is not tracked")]
    NotFound(PrNumber),
}

impl From<SnapshotError> for StoreError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(e) => StoreError::Io(e),
            SnapshotError::Json(e) => StoreError::Json(e),
            SnapshotError::SchemaMismatch { expected, got } => {
                StoreError::SchemaMismatch { expected, got }
            }
        }
    }
}

/// Durable store of tracked PRs.
#[derive(Debug)]
pub struct SnapshotStore {
    /// Snapshot file; `None` for an in-memory store.
    path: Option<PathBuf>,
    state: Mutex<TrackerSnapshot>,
    /// Number of committed mutations since open.
    revision: AtomicU64,
}

impl SnapshotStore {
    /// Opens the store at `path`, creating an empty snapshot if none exists.
    ///
    /// Snapshots from older schema versions are migrated and rewritten.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let snapshot = match try_load_snapshot(&path)? {
            Some(loaded) => {
                if let Some(from) = loaded.migrated_from {
                    info!(
                        path = %path.display(),
                        from,
                        to = loaded.snapshot.schema_version,
                        "Migrated state snapshot"
                    );
                    save_snapshot_atomic(&path, &loaded.snapshot)?;
                }
                loaded.snapshot
            }
            None => {
                let snapshot = TrackerSnapshot::new();
                save_snapshot_atomic(&path, &snapshot)?;
                info!(path = %path.display(), "Created new state snapshot");
                snapshot
            }
        };

        Ok(SnapshotStore {
            path: Some(path),
            state: Mutex::new(snapshot),
            revision: AtomicU64::new(0),
        })
    }

    /// Creates a store that is never written to disk.
    pub fn in_memory() -> Self {
        SnapshotStore {
            path: None,
            state: Mutex::new(TrackerSnapshot::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of mutations committed since the store was opened. Each one is
    /// a snapshot write for a file-backed store.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, TrackerSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `change` to a copy of the state and commits it.
    ///
    /// `change` returns its result and whether it modified anything; an
    /// unmodified state is not rewritten.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut TrackerSnapshot) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.lock();
        let mut next = state.clone();

        let (value, changed) = change(&mut next)?;
        if !changed {
            return Ok(value);
        }

        next.touch();
        if let Some(path) = &self.path {
            save_snapshot_atomic(path, &next)?;
        }
        *state = next;
        self.revision.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Starts tracking `pr` as open. Returns false if it was already tracked.
    pub fn add_if_absent(
        &self,
        pr: PrNumber,
        title: &str,
        author: &str,
    ) -> Result<bool, StoreError> {
        self.mutate(|state| {
            if state.prs.contains_key(&pr) {
                return Ok((false, false));
            }
            state
                .prs
                .insert(pr, TrackedPr::new(pr, title, author, Utc::now()));
            debug!(pr = %pr, "Tracking PR");
            Ok((true, true))
        })
    }

    pub fn get(&self, pr: PrNumber) -> Option<TrackedPr> {
        self.lock().prs.get(&pr).cloned()
    }

    pub fn contains(&self, pr: PrNumber) -> bool {
        self.lock().prs.contains_key(&pr)
    }

    /// All tracked PRs, highest PR number first.
    pub fn list(&self) -> Vec<TrackedPr> {
        self.lock().prs.values().rev().cloned().collect()
    }

    /// Records a fresh upstream answer for a tracked PR: replaces its status,
    /// title and author and stamps `last_checked_at`.
    ///
    /// Returns the stored row. `updated_at` only moves when one of the three
    /// fields changed.
    pub fn update_status(
        &self,
        pr: PrNumber,
        status: PrStatus,
        title: &str,
        author: &str,
    ) -> Result<TrackedPr, StoreError> {
        self.mutate(|state| {
            let row = state.prs.get_mut(&pr).ok_or(StoreError::NotFound(pr))?;
            let changed = row.status != status || row.title != title || row.author != author;
            if changed {
                row.status = status;
                row.title = title.to_string();
                row.author = author.to_string();
                row.updated_at = Utc::now();
            }
            row.last_checked_at = Some(Utc::now());
            Ok((row.clone(), true))
        })
    }

    /// Records that the PR's merge commit reached `branch`.
    ///
    /// Returns true only for the first landing; later calls leave the
    /// original timestamp in place and write nothing. A first landing also
    /// stamps `last_checked_at`.
    pub fn mark_branch_landed(&self, pr: PrNumber, branch: &str) -> Result<bool, StoreError> {
        self.mutate(|state| {
            let row = state.prs.get_mut(&pr).ok_or(StoreError::NotFound(pr))?;
            if row.is_landed(branch) {
                return Ok((false, false));
            }
            let now = Utc::now();
            row.landed.insert(branch.to_string(), now);
            row.updated_at = now;
            row.last_checked_at = Some(now);
            Ok((true, true))
        })
    }

    /// Stamps `last_checked_at` with the current time.
    pub fn touch_checked(&self, pr: PrNumber) -> Result<(), StoreError> {
        self.mutate(|state| {
            let row = state.prs.get_mut(&pr).ok_or(StoreError::NotFound(pr))?;
            row.last_checked_at = Some(Utc::now());
            Ok(((), true))
        })
    }

    /// Stops tracking `pr`, dropping its landing rows with it.
    pub fn remove(&self, pr: PrNumber) -> Result<Option<TrackedPr>, StoreError> {
        self.mutate(|state| {
            let removed = state.prs.remove(&pr);
            let changed = removed.is_some();
            Ok((removed, changed))
        })
    }

    /// Stops tracking `pr` only if every branch in `branches` has a landing
    /// row in the stored state.
    pub fn remove_if_landed<S: AsRef<str>>(
        &self,
        pr: PrNumber,
        branches: &[S],
    ) -> Result<Option<TrackedPr>, StoreError> {
        self.mutate(|state| {
            let landed = state
                .prs
                .get(&pr)
                .is_some_and(|row| row.all_landed(branches));
            if !landed {
                return Ok((None, false));
            }
            Ok((state.prs.remove(&pr), true))
        })
    }
}
