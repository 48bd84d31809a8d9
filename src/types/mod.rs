//! Core domain types for the PR tracker.
//!
//! The types encode the lifecycle invariants directly: a merged PR always
//! carries its merge commit, and landings are a set that only grows.

pub mod ids;
pub mod pr;

pub use ids::{InvalidRepoId, PrNumber, RepoId, Sha};
pub use pr::{BranchStatus, PrStatus, PrView, TrackedPr};
