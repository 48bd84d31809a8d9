//! PR Tracker - follows pull requests from open to merged to landed in every
//! monitored branch.
//!
//! This library provides the domain types, the GitHub client, the state store,
//! the polling engine and the HTTP surface of the tracker.

pub mod config;
pub mod events;
pub mod github;
pub mod notifier;
pub mod persistence;
pub mod poller;
pub mod server;
pub mod types;

#[cfg(test)]
mod test_utils;
