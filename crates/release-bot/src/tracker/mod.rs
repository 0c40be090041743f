//! Tracker abstraction: the remote issue tracker and project boards.
//!
//! Everything the reconcilers know about labels, boards, columns and cards is
//! read through the [`Tracker`] trait on every reconciliation. Nothing is cached.

pub mod github;
pub mod memory;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TrackerError {
    /// HTTP status of an API error, if there is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// A repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    pub owner: String,
    pub name: String,
}

impl Repo {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Board state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardState {
    Open,
    Closed,
}

impl BoardState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Which boards a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardScope {
    /// Open boards only.
    Open,
    /// Open and closed boards.
    All,
}

impl BoardScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::All => "all",
        }
    }

    #[must_use]
    pub fn includes(self, state: BoardState) -> bool {
        match self {
            Self::Open => state == BoardState::Open,
            Self::All => true,
        }
    }
}

/// A project board. One release is represented by one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: u64,
    pub name: String,
    pub state: BoardState,
    #[serde(default)]
    pub body: String,
}

/// A column on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: u64,
    pub name: String,
    pub board_id: u64,
}

/// A card in a column. Notes have no content URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: u64,
    pub column_id: u64,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// A repository label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// An issue or pull request.
///
/// `id` is the issue id, except for pull requests decoded from `pull_request`
/// deliveries, which only carry the pull request's own id. Those set
/// `pull_request_id` and `id` to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    /// API URL; card content URLs point here.
    pub url: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub is_pull_request: bool,
    /// Pull request id, when known. Issue listings never carry it.
    #[serde(default)]
    pub pull_request_id: Option<u64>,
}

impl Issue {
    /// Card content this issue is placed on a board as.
    ///
    /// A pull request card needs the pull request id; without it the card is
    /// created from the pull request's issue id.
    #[must_use]
    pub fn card_content(&self) -> CardContent {
        match self.pull_request_id {
            Some(id) => CardContent {
                id,
                content_type: ContentType::PullRequest,
            },
            None => CardContent {
                id: self.id,
                content_type: ContentType::Issue,
            },
        }
    }
}

/// Content type of a card created from an issue or pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Issue,
    PullRequest,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "Issue",
            Self::PullRequest => "PullRequest",
        }
    }
}

/// What a new card points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardContent {
    pub id: u64,
    pub content_type: ContentType,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Page to request next, `None` once the listing is exhausted.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Operations the reconcilers need from the issue tracker and its boards.
///
/// Listing operations are paginated: pages are 1-based and callers loop on
/// [`Page::next_page`] until it is `None` (see [`collect_pages`]).
#[async_trait]
pub trait Tracker: Send + Sync {
    /// List the labels defined in a repository.
    async fn list_labels(&self, repo: &Repo, page: u32) -> Result<Page<Label>, TrackerError>;

    /// Create a repository label.
    async fn create_label(&self, repo: &Repo, name: &str, color: &str)
        -> Result<Label, TrackerError>;

    /// Add labels to an issue.
    async fn add_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError>;

    /// Remove one label from an issue. Returns a 404 error if it was not applied.
    async fn remove_label(
        &self,
        repo: &Repo,
        issue_number: u64,
        label: &str,
    ) -> Result<(), TrackerError>;

    /// List the labels applied to an issue.
    async fn list_issue_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        page: u32,
    ) -> Result<Page<Label>, TrackerError>;

    /// List the boards of a repository.
    async fn list_boards(
        &self,
        repo: &Repo,
        scope: BoardScope,
        page: u32,
    ) -> Result<Page<Board>, TrackerError>;

    /// Create a repository board.
    async fn create_board(&self, repo: &Repo, name: &str, body: &str)
        -> Result<Board, TrackerError>;

    /// Fetch a board by id.
    async fn get_board(&self, board_id: u64) -> Result<Board, TrackerError>;

    /// Open or close a board.
    async fn update_board_state(
        &self,
        board_id: u64,
        state: BoardState,
    ) -> Result<Board, TrackerError>;

    /// List a board's columns in board order.
    async fn list_columns(&self, board_id: u64, page: u32) -> Result<Page<Column>, TrackerError>;

    /// Fetch a column by id.
    async fn get_column(&self, column_id: u64) -> Result<Column, TrackerError>;

    /// Append a column to a board.
    async fn create_column(&self, board_id: u64, name: &str) -> Result<Column, TrackerError>;

    /// List a column's cards, top first.
    async fn list_cards(&self, column_id: u64, page: u32) -> Result<Page<Card>, TrackerError>;

    /// Create a card for an issue or pull request. New cards land at the top.
    async fn create_card(&self, column_id: u64, content: CardContent)
        -> Result<Card, TrackerError>;

    /// Move a card to the top of a column.
    async fn move_card(&self, card_id: u64, column_id: u64) -> Result<(), TrackerError>;

    /// Delete a card.
    async fn delete_card(&self, card_id: u64) -> Result<(), TrackerError>;

    /// List the issues (and pull requests) of a repository, open and closed.
    async fn list_issues(&self, repo: &Repo, page: u32) -> Result<Page<Issue>, TrackerError>;
}

/// Exhaust a paginated listing, starting at page 1.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, TrackerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, TrackerError>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let Page {
            items: batch,
            next_page,
        } = fetch(page).await?;
        items.extend(batch);
        match next_page {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }
    Ok(items)
}

/// Trailing numeric id of an API URL, e.g. `.../projects/columns/367` -> 367.
#[must_use]
pub fn id_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
