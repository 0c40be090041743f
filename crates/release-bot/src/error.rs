//! Error types for reconciliation and migration.

use std::time::Duration;

use thiserror::Error;

use crate::tracker::TrackerError;

/// Errors that can end a reconciliation or a migration run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A board, column, card or issue could not be resolved.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The tracker rejected or failed a request.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A freshly created board never showed its canonical columns.
    #[error("provisioning of board '{board}' did not complete after {attempts} checks ({columns} columns seen)")]
    ProvisioningTimeout {
        board: String,
        attempts: u32,
        columns: usize,
    },

    /// The reconciliation ran past its deadline and was abandoned.
    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

impl SyncError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}
