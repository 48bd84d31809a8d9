//! Persistence layer for the tracker.
//!
//! The tracker's entire state is a single JSON snapshot, rewritten atomically
//! on every change.
//!
//! # Crash Safety
//!
//! - Snapshots: Written atomically using write-to-temp-then-rename
//! - Both the file and its directory are fsynced before a write returns
//! - A failed write leaves the in-memory state untouched

pub mod snapshot;
pub mod store;

pub use snapshot::{
    LoadedSnapshot, SCHEMA_VERSION, SnapshotError, TrackerSnapshot, load_snapshot,
    save_snapshot_atomic, try_load_snapshot,
};
pub use store::{SnapshotStore, StoreError};
