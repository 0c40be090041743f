//! What a reconciliation did.

use std::fmt;

use serde::Serialize;

use crate::provisioning::ProvisionReport;

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    CardCreated { card_id: u64, column: String },
    CardMoved { card_id: u64, from: String, to: String },
    CardDeleted { card_id: u64, column: String },
    AlreadyPlaced { card_id: u64, column: String },
    LabelsSynced { added: Vec<String>, removed: Vec<String> },
    Provisioned(ProvisionReport),
    /// One outcome per label of a newly opened issue.
    Many { outcomes: Vec<Outcome> },
    Skipped { reason: SkipReason },
}

impl Outcome {
    #[must_use]
    pub const fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }
}

/// Why an event needed no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Label is not `{prefix}/{stage}`.
    NotStageLabel,
    /// No open board carries the label's release prefix.
    NoBoard,
    /// The issue has no card on the board.
    NoCard,
    /// The issue's card sits in another stage's column.
    CardElsewhere,
    /// The card is a note, not an issue or pull request.
    NoContent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NotStageLabel => "not a stage label",
            Self::NoBoard => "no open board for release",
            Self::NoCard => "issue has no card on the board",
            Self::CardElsewhere => "card is in another column",
            Self::NoContent => "card has no issue content",
        };
        f.write_str(reason)
    }
}
