//! Release board synchronization for GitHub project boards.
//!
//! This crate provides:
//! - The `{release}/{stage}` label codec and stage/column tables
//! - Board and column resolution against a [`Tracker`]
//! - Label↔placement reconciliation driven by webhook events
//! - Provisioning of release boards (columns + canonical labels)
//! - Priority-ordered migration of cards between release boards
//! - A bounded event dispatcher and the HTTP webhook service

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Nearly every operation goes through the tracker and can fail

pub mod board;
pub mod column;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod label;
pub mod migration;
pub mod outcome;
pub mod placement;
pub mod provisioning;
pub mod retry;
pub mod server;
pub mod tracker;
pub mod webhooks;

pub use config::Config;
pub use dispatch::{Dispatcher, Engine};
pub use error::SyncError;
pub use events::Event;
pub use outcome::{Outcome, SkipReason};
pub use tracker::{github::GitHubTracker, memory::MemoryTracker, Tracker, TrackerError};
