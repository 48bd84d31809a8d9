//! On-disk snapshot format for the tracker state.
//!
//! The whole state is a single JSON document. It is written atomically using
//! a write-to-temp-then-rename pattern:
//! 1. Write to `<path>.tmp`
//! 2. fsync the file
//! 3. Rename to `<path>`
//! 4. fsync the directory
//!
//! Readers therefore always see either the old or the new snapshot, never a
//! partial write.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PrNumber, TrackedPr};

/// Current schema version. Increment when making breaking changes.
///
/// Version 2 added `last_checked_at` to each PR.
pub const SCHEMA_VERSION: u32 = 2;

/// Oldest schema version that can still be migrated.
const OLDEST_SUPPORTED_VERSION: u32 = 1;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by an incompatible version.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Persisted tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this snapshot was last written.
    pub snapshot_at: DateTime<Utc>,

    /// Tracked PRs, keyed by PR number.
    #[serde(default)]
    pub prs: BTreeMap<PrNumber, TrackedPr>,
}

impl TrackerSnapshot {
    /// Creates a new empty snapshot.
    pub fn new() -> Self {
        TrackerSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            prs: BTreeMap::new(),
        }
    }

    /// Updates the `snapshot_at` timestamp to now.
    pub fn touch(&mut self) {
        self.snapshot_at = Utc::now();
    }
}

impl Default for TrackerSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot read from disk, with whether it needed migrating.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: TrackerSnapshot,
    /// The version found on disk, if older than [`SCHEMA_VERSION`].
    pub migrated_from: Option<u32>,
}

/// Saves a snapshot atomically to disk.
///
/// # Errors
///
/// Returns an error if any IO operation fails. On error the previous file,
/// if any, is left in place.
pub fn save_snapshot_atomic(path: &Path, snapshot: &TrackerSnapshot) -> Result<(), SnapshotError> {
    if let Some(parent) = non_empty_parent(path) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    // The rename is only durable once the directory entry is.
    if let Some(parent) = non_empty_parent(path) {
        File::open(parent)?.sync_all()?;
    }

    Ok(())
}

/// Loads a snapshot, migrating older schema versions in memory.
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist or can't be read
/// - The JSON is malformed
/// - The schema version is newer than this build understands, or too old
pub fn load_snapshot(path: &Path) -> Result<LoadedSnapshot, SnapshotError> {
    let bytes = std::fs::read(path)?;
    let mut snapshot: TrackerSnapshot = serde_json::from_slice(&bytes)?;

    let found = snapshot.schema_version;
    if !(OLDEST_SUPPORTED_VERSION..=SCHEMA_VERSION).contains(&found) {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: found,
        });
    }

    // v1 -> v2: `last_checked_at` did not exist and deserializes as None.
    let migrated_from = (found < SCHEMA_VERSION).then_some(found);
    snapshot.schema_version = SCHEMA_VERSION;

    Ok(LoadedSnapshot {
        snapshot,
        migrated_from,
    })
}

/// Attempts to load a snapshot, returning None if the file doesn't exist.
///
/// Other errors (malformed JSON, schema mismatch) are propagated.
pub fn try_load_snapshot(path: &Path) -> Result<Option<LoadedSnapshot>, SnapshotError> {
    match load_snapshot(path) {
        Ok(loaded) => Ok(Some(loaded)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// `Path::parent` returns `Some("")` for bare file names.
fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}
