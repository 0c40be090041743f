//! Column resolution on a release board.

use std::sync::Arc;

use crate::error::SyncError;
use crate::label::column_name_for;
use crate::tracker::{collect_pages, Board, Card, Column, Tracker, TrackerError};

/// Looks up columns and their cards.
#[derive(Clone)]
pub struct ColumnResolver {
    tracker: Arc<dyn Tracker>,
}

impl ColumnResolver {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self { tracker }
    }

    /// Every column of a board, in board order.
    pub async fn list_columns(&self, board: &Board) -> Result<Vec<Column>, TrackerError> {
        collect_pages(|page| self.tracker.list_columns(board.id, page)).await
    }

    /// Every card of a column, top first.
    pub async fn list_cards(&self, column: &Column) -> Result<Vec<Card>, TrackerError> {
        collect_pages(|page| self.tracker.list_cards(column.id, page)).await
    }

    /// Column a stage places cards in; custom stages are looked up verbatim.
    pub async fn find_column(&self, board: &Board, stage: &str) -> Result<Column, SyncError> {
        self.find_column_by_name(board, column_name_for(stage)).await
    }

    /// Column with exactly this name.
    pub async fn find_column_by_name(
        &self,
        board: &Board,
        name: &str,
    ) -> Result<Column, SyncError> {
        self.list_columns(board)
            .await?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SyncError::not_found("column", format!("'{name}' on '{}'", board.name)))
    }
}

/// Where an issue's card currently sits on a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub card: Card,
    pub column: Column,
}

impl ColumnResolver {
    /// Scan every column for the card whose content is `content_url`.
    ///
    /// An issue has at most one card per board, so the first hit is the card.
    pub async fn find_placement(
        &self,
        board: &Board,
        content_url: &str,
    ) -> Result<Option<Placement>, TrackerError> {
        for column in self.list_columns(board).await? {
            let found = self
                .list_cards(&column)
                .await?
                .into_iter()
                .find(|card| card.content_url.as_deref() == Some(content_url));
            if let Some(card) = found {
                return Ok(Some(Placement { card, column }));
            }
        }
        Ok(None)
    }
}
