//! Release board resolution and creation.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;
use crate::tracker::{collect_pages, Board, BoardScope, BoardState, Repo, Tracker, TrackerError};

/// Finds and creates the boards that represent releases.
#[derive(Clone)]
pub struct BoardResolver {
    tracker: Arc<dyn Tracker>,
}

impl BoardResolver {
    #[must_use]
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self { tracker }
    }

    /// Every board of the repository within `scope`, across all pages.
    pub async fn list_boards(
        &self,
        repo: &Repo,
        scope: BoardScope,
    ) -> Result<Vec<Board>, TrackerError> {
        let boards = collect_pages(|page| self.tracker.list_boards(repo, scope, page)).await?;
        Ok(boards
            .into_iter()
            .filter(|b| scope.includes(b.state))
            .collect())
    }

    /// The board whose name starts with `prefix`.
    ///
    /// When several boards match, the one with the lowest id wins so the
    /// answer does not depend on listing order.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn find_board(
        &self,
        repo: &Repo,
        prefix: &str,
        scope: BoardScope,
    ) -> Result<Board, SyncError> {
        let matches: Vec<Board> = self
            .list_boards(repo, scope)
            .await?
            .into_iter()
            .filter(|b| b.name.starts_with(prefix))
            .collect();

        if matches.len() > 1 {
            warn!(
                prefix = %prefix,
                boards = ?matches.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
                "Several boards share the release prefix, using the lowest id"
            );
        }

        pick_lowest_id(matches).ok_or_else(|| {
            SyncError::not_found("board", format!("prefix {prefix} in {repo}"))
        })
    }

    /// The board named exactly `name`.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn find_board_by_name(
        &self,
        repo: &Repo,
        name: &str,
        scope: BoardScope,
    ) -> Result<Board, SyncError> {
        let matches = self
            .list_boards(repo, scope)
            .await?
            .into_iter()
            .filter(|b| b.name == name)
            .collect();
        pick_lowest_id(matches)
            .ok_or_else(|| SyncError::not_found("board", format!("'{name}' in {repo}")))
    }

    /// Create a release board.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn create_board(&self, repo: &Repo, name: &str) -> Result<Board, SyncError> {
        let body = board_description(name);
        let board = self.tracker.create_board(repo, name, &body).await?;
        info!(board = %board.name, board_id = board.id, "Created release board");
        Ok(board)
    }

    /// Close a board (done with the source board after a migration).
    pub async fn close_board(&self, board: &Board) -> Result<Board, SyncError> {
        let closed = self
            .tracker
            .update_board_state(board.id, BoardState::Closed)
            .await?;
        debug!(board = %board.name, "Closed board");
        Ok(closed)
    }
}

fn pick_lowest_id(boards: Vec<Board>) -> Option<Board> {
    boards.into_iter().min_by_key(|b| b.id)
}

/// Board description for release names like `18.02.0-ce-rc2`.
///
/// Names that do not split into version, edition and candidate get no
/// description.
#[must_use]
pub fn board_description(name: &str) -> String {
    match name.split('-').collect::<Vec<_>>().as_slice() {
        [version, edition, candidate] => format!(
            "Docker {version} {} {} release",
            edition.to_uppercase(),
            candidate.to_uppercase()
        ),
        _ => String::new(),
    }
}
