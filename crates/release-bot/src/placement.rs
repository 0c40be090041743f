//! Label ↔ placement reconciliation.
//!
//! Two directions, both re-reading remote state on every call:
//!
//! - **label → placement**: a stage label on an issue puts the issue's card in
//!   the matching column of the release board (create, move or leave alone);
//!   removing the label deletes the card from that column.
//! - **placement → label**: a card created or moved into a column gets exactly
//!   the canonical label of that column's stage; a deleted card loses all of
//!   them.
//!
//! Adding a label that is already applied, or removing one that is not, is
//! never issued. That is what stops a change made here from bouncing back as a
//! webhook and triggering another change.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::board::BoardResolver;
use crate::column::ColumnResolver;
use crate::error::SyncError;
use crate::label::{canonical_labels, release_prefix, stage_for, StageLabel};
use crate::outcome::{Outcome, SkipReason};
use crate::tracker::{
    collect_pages, id_from_url, Board, BoardScope, Card, Column, Issue, Repo, Tracker,
    TrackerError,
};

/// Keeps card placement and stage labels in agreement.
#[derive(Clone)]
pub struct PlacementReconciler {
    tracker: Arc<dyn Tracker>,
    boards: BoardResolver,
    columns: ColumnResolver,
}

impl PlacementReconciler {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            boards: BoardResolver::new(tracker.clone()),
            columns: ColumnResolver::new(tracker.clone()),
            tracker,
        }
    }

    /// Open release board for a label, or the reason there is nothing to do.
    async fn release_board(
        &self,
        repo: &Repo,
        label: &str,
    ) -> Result<Result<(StageLabel, Board), SkipReason>, SyncError> {
        let Ok(stage_label) = StageLabel::parse(label) else {
            debug!(label = %label, "Ignoring non-stage label");
            return Ok(Err(SkipReason::NotStageLabel));
        };

        match self
            .boards
            .find_board(repo, &stage_label.prefix, BoardScope::Open)
            .await
        {
            Ok(board) => Ok(Ok((stage_label, board))),
            Err(SyncError::NotFound { .. }) => {
                // Labels may be applied before the release board exists.
                info!(
                    label = %label,
                    prefix = %stage_label.prefix,
                    "No open board for release, nothing to place"
                );
                Ok(Err(SkipReason::NoBoard))
            }
            Err(e) => Err(e),
        }
    }

    /// A stage label was added to an issue: put its card in the stage column.
    #[instrument(skip(self, repo, issue), fields(repo = %repo, issue = issue.number))]
    pub async fn place(&self, repo: &Repo, issue: &Issue, label: &str) -> Result<Outcome, SyncError> {
        let (stage_label, board) = match self.release_board(repo, label).await? {
            Ok(found) => found,
            Err(reason) => return Ok(Outcome::skipped(reason)),
        };

        // Columns are provisioned elsewhere; a missing one is an error here.
        let column = self.columns.find_column(&board, &stage_label.stage).await?;

        let Some(placement) = self.columns.find_placement(&board, &issue.url).await? else {
            let card = self
                .tracker
                .create_card(column.id, issue.card_content())
                .await?;
            info!(
                board = %board.name,
                column = %column.name,
                card_id = card.id,
                "Created card"
            );
            return Ok(Outcome::CardCreated {
                card_id: card.id,
                column: column.name,
            });
        };

        if placement.column.id == column.id {
            debug!(column = %column.name, "Card already in place");
            return Ok(Outcome::AlreadyPlaced {
                card_id: placement.card.id,
                column: column.name,
            });
        }

        self.tracker
            .move_card(placement.card.id, column.id)
            .await?;
        info!(
            board = %board.name,
            from = %placement.column.name,
            to = %column.name,
            card_id = placement.card.id,
            "Moved card"
        );
        Ok(Outcome::CardMoved {
            card_id: placement.card.id,
            from: placement.column.name,
            to: column.name,
        })
    }

    /// A stage label was removed from an issue: delete its card from that
    /// stage's column. A card sitting in any other column is left alone.
    #[instrument(skip(self, repo, issue), fields(repo = %repo, issue = issue.number))]
    pub async fn unplace(
        &self,
        repo: &Repo,
        issue: &Issue,
        label: &str,
    ) -> Result<Outcome, SyncError> {
        let (stage_label, board) = match self.release_board(repo, label).await? {
            Ok(found) => found,
            Err(reason) => return Ok(Outcome::skipped(reason)),
        };

        let Some(placement) = self.columns.find_placement(&board, &issue.url).await? else {
            debug!(board = %board.name, "Issue has no card on the board");
            return Ok(Outcome::skipped(SkipReason::NoCard));
        };

        if placement.column.name != stage_label.column_name() {
            debug!(
                column = %placement.column.name,
                stage = %stage_label.stage,
                "Card is not in the unlabeled stage's column"
            );
            return Ok(Outcome::skipped(SkipReason::CardElsewhere));
        }

        self.tracker.delete_card(placement.card.id).await?;
        info!(
            board = %board.name,
            column = %placement.column.name,
            card_id = placement.card.id,
            "Deleted card"
        );
        Ok(Outcome::CardDeleted {
            card_id: placement.card.id,
            column: placement.column.name,
        })
    }

    /// A card was created in or moved into a column: apply that column's stage
    /// label and drop the release's other canonical labels.
    #[instrument(skip(self, repo, card), fields(repo = %repo, card_id = card.id))]
    pub async fn sync_labels(&self, repo: &Repo, card: &Card) -> Result<Outcome, SyncError> {
        let Some(issue_number) = card_issue_number(card) else {
            return Ok(Outcome::skipped(SkipReason::NoContent));
        };
        let (column, board) = self.card_location(card).await?;
        let prefix = release_prefix(&board.name);
        let wanted = stage_for(&column.name);

        let applied: HashSet<String> =
            collect_pages(|page| self.tracker.list_issue_labels(repo, issue_number, page))
                .await?
                .into_iter()
                .map(|l| l.name)
                .collect();

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for label in canonical_labels(&prefix) {
            let is_applied = applied.contains(&label.name);
            if Some(label.stage) == wanted {
                if !is_applied {
                    self.tracker
                        .add_labels(repo, issue_number, std::slice::from_ref(&label.name))
                        .await?;
                    added.push(label.name);
                }
            } else if is_applied && self.remove_label(repo, issue_number, &label.name).await? {
                removed.push(label.name);
            }
        }

        if added.is_empty() && removed.is_empty() {
            debug!(column = %column.name, "Labels already match placement");
        } else {
            info!(
                issue = issue_number,
                column = %column.name,
                added = ?added,
                removed = ?removed,
                "Synced stage labels"
            );
        }
        Ok(Outcome::LabelsSynced { added, removed })
    }

    /// A card was deleted: remove every canonical label of its release.
    #[instrument(skip(self, repo, card), fields(repo = %repo, card_id = card.id))]
    pub async fn clear_labels(&self, repo: &Repo, card: &Card) -> Result<Outcome, SyncError> {
        let Some(issue_number) = card_issue_number(card) else {
            return Ok(Outcome::skipped(SkipReason::NoContent));
        };
        let (_, board) = self.card_location(card).await?;
        let prefix = release_prefix(&board.name);

        let mut removed = Vec::new();
        for label in canonical_labels(&prefix) {
            if self.remove_label(repo, issue_number, &label.name).await? {
                removed.push(label.name);
            }
        }
        info!(issue = issue_number, removed = ?removed, "Cleared stage labels of deleted card");
        Ok(Outcome::LabelsSynced {
            added: Vec::new(),
            removed,
        })
    }

    /// Follow a card's column reference, then the column's board reference.
    async fn card_location(&self, card: &Card) -> Result<(Column, Board), TrackerError> {
        let column = self.tracker.get_column(card.column_id).await?;
        let board = self.tracker.get_board(column.board_id).await?;
        Ok((column, board))
    }

    /// Remove a label; `false` when it was not applied (404).
    async fn remove_label(
        &self,
        repo: &Repo,
        issue_number: u64,
        label: &str,
    ) -> Result<bool, TrackerError> {
        match self.tracker.remove_label(repo, issue_number, label).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(label = %label, issue = issue_number, "Label was not applied");
                Ok(false)
            }
            Err(e) => {
                warn!(label = %label, issue = issue_number, error = %e, "Failed to remove label");
                Err(e)
            }
        }
    }
}

/// Issue number a card points at, `None` for notes.
fn card_issue_number(card: &Card) -> Option<u64> {
    let number = card.content_url.as_deref().and_then(id_from_url);
    if number.is_none() {
        debug!(card_id = card.id, "Card has no issue content");
    }
    number
}
