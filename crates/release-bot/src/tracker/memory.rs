//! In-memory tracker.
//!
//! Mirrors the observable behaviour of the GitHub boards API that the
//! reconcilers depend on: paginated listings, new cards inserted at the top of
//! a column, 422 on a second card for the same issue on a board and 404 when
//! removing a label that is not applied. Every mutating call is recorded so
//! tests can assert on exactly what was issued.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Board, BoardScope, BoardState, Card, CardContent, Column, ContentType, Issue, Label, Page,
    Repo, Tracker, TrackerError,
};

const DEFAULT_PAGE_SIZE: usize = 30;
const DEFAULT_LABEL_COLOR: &str = "ededed";

/// A mutating call issued against the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateLabel(String),
    AddLabels { issue: u64, labels: Vec<String> },
    RemoveLabel { issue: u64, label: String },
    CreateBoard(String),
    UpdateBoardState { board_id: u64, state: BoardState },
    CreateColumn { board_id: u64, name: String },
    CreateCard {
        column_id: u64,
        content_id: u64,
        content_type: ContentType,
    },
    MoveCard { card_id: u64, column_id: u64 },
    DeleteCard(u64),
}

#[derive(Default)]
struct State {
    next_id: u64,
    labels: HashMap<Repo, Vec<Label>>,
    issues: HashMap<Repo, Vec<Issue>>,
    boards: Vec<(Repo, Board)>,
    columns: Vec<Column>,
    /// Cards per column, top first.
    cards: HashMap<u64, Vec<Card>>,
    /// Content ids whose card creation fails with the given status.
    card_failures: HashMap<u64, u16>,
    calls: Vec<Call>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn board(&self, board_id: u64) -> Result<&Board, TrackerError> {
        self.boards
            .iter()
            .map(|(_, b)| b)
            .find(|b| b.id == board_id)
            .ok_or_else(|| not_found(format!("board {board_id}")))
    }

    fn column(&self, column_id: u64) -> Result<&Column, TrackerError> {
        self.columns
            .iter()
            .find(|c| c.id == column_id)
            .ok_or_else(|| not_found(format!("column {column_id}")))
    }

    fn issue_mut(&mut self, repo: &Repo, number: u64) -> Result<&mut Issue, TrackerError> {
        self.issues
            .get_mut(repo)
            .and_then(|issues| issues.iter_mut().find(|i| i.number == number))
            .ok_or_else(|| not_found(format!("issue {repo}#{number}")))
    }

    /// The issue a card's content points at. Pull request content only
    /// resolves through the pull request id.
    fn issue_for(&self, content: CardContent) -> Option<&Issue> {
        self.issues
            .values()
            .flatten()
            .find(|i| match content.content_type {
                ContentType::Issue => i.id == content.id,
                ContentType::PullRequest => i.pull_request_id == Some(content.id),
            })
    }

    fn board_cards(&self, board_id: u64) -> impl Iterator<Item = &Card> {
        self.columns
            .iter()
            .filter(move |c| c.board_id == board_id)
            .filter_map(move |c| self.cards.get(&c.id))
            .flatten()
    }

    fn label_color(&self, repo: &Repo, name: &str) -> String {
        self.labels
            .get(repo)
            .and_then(|labels| labels.iter().find(|l| l.name == name))
            .map_or_else(|| DEFAULT_LABEL_COLOR.to_string(), |l| l.color.clone())
    }
}

fn not_found(what: String) -> TrackerError {
    TrackerError::Api {
        status: 404,
        message: format!("Not Found: {what}"),
    }
}

fn unprocessable(message: &str) -> TrackerError {
    TrackerError::Api {
        status: 422,
        message: message.to_string(),
    }
}

/// Tracker held entirely in memory.
pub struct MemoryTracker {
    state: Mutex<State>,
    page_size: usize,
    latency: Duration,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            latency: Duration::ZERO,
        }
    }

    /// Use a small page size to exercise pagination.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every tracker call, to exercise timeouts and queueing.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let page = page.max(1) as usize;
        let start = (page - 1) * self.page_size;
        let end = (start + self.page_size).min(items.len());
        let slice = items.get(start..end).unwrap_or_default().to_vec();
        let next_page = if end < items.len() {
            u32::try_from(page + 1).ok()
        } else {
            None
        };
        Page {
            items: slice,
            next_page,
        }
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    pub fn add_label(&self, repo: &Repo, name: &str, color: &str) -> Label {
        let label = Label {
            name: name.to_string(),
            color: color.to_string(),
        };
        self.state()
            .labels
            .entry(repo.clone())
            .or_default()
            .push(label.clone());
        label
    }

    pub fn add_board(&self, repo: &Repo, name: &str, state: BoardState) -> Board {
        let mut s = self.state();
        let board = Board {
            id: s.next_id(),
            name: name.to_string(),
            state,
            body: String::new(),
        };
        s.boards.push((repo.clone(), board.clone()));
        board
    }

    pub fn add_column(&self, board_id: u64, name: &str) -> Column {
        let mut s = self.state();
        let column = Column {
            id: s.next_id(),
            name: name.to_string(),
            board_id,
        };
        s.columns.push(column.clone());
        s.cards.insert(column.id, Vec::new());
        column
    }

    /// Register an issue carrying the given labels.
    pub fn add_issue(&self, repo: &Repo, number: u64, labels: &[&str]) -> Issue {
        self.insert_issue(repo, number, labels, false)
    }

    /// Register a pull request. The returned value carries the pull request
    /// id as a `pull_request` delivery would; issue listings leave it out.
    pub fn add_pull_request(&self, repo: &Repo, number: u64, labels: &[&str]) -> Issue {
        self.insert_issue(repo, number, labels, true)
    }

    fn insert_issue(&self, repo: &Repo, number: u64, labels: &[&str], is_pr: bool) -> Issue {
        let mut s = self.state();
        let labels = labels
            .iter()
            .map(|name| Label {
                name: (*name).to_string(),
                color: s.label_color(repo, name),
            })
            .collect();
        let id = s.next_id();
        let issue = Issue {
            id: 100_000 + id,
            number,
            url: format!("https://api.github.com/repos/{repo}/issues/{number}"),
            labels,
            is_pull_request: is_pr,
            pull_request_id: is_pr.then_some(200_000 + id),
        };
        s.issues
            .entry(repo.clone())
            .or_default()
            .push(issue.clone());
        issue
    }

    /// Place a card for `issue` at the bottom of a column.
    pub fn add_card(&self, column_id: u64, issue: &Issue) -> Card {
        let mut s = self.state();
        let card = Card {
            id: s.next_id(),
            column_id,
            content_url: Some(issue.url.clone()),
        };
        s.cards.entry(column_id).or_default().push(card.clone());
        card
    }

    /// Make card creation for `content_id` fail with `status`.
    pub fn fail_card_creation(&self, content_id: u64, status: u16) {
        self.state().card_failures.insert(content_id, status);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Cards of a column, top first.
    #[must_use]
    pub fn cards(&self, column_id: u64) -> Vec<Card> {
        self.state()
            .cards
            .get(&column_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn columns(&self, board_id: u64) -> Vec<Column> {
        self.state()
            .columns
            .iter()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn boards(&self, repo: &Repo) -> Vec<Board> {
        self.state()
            .boards
            .iter()
            .filter(|(r, _)| r == repo)
            .map(|(_, b)| b.clone())
            .collect()
    }

    #[must_use]
    pub fn labels(&self, repo: &Repo) -> Vec<Label> {
        self.state().labels.get(repo).cloned().unwrap_or_default()
    }

    /// Names of the labels applied to an issue.
    #[must_use]
    pub fn issue_labels(&self, repo: &Repo, number: u64) -> Vec<String> {
        self.state()
            .issues
            .get(repo)
            .and_then(|issues| issues.iter().find(|i| i.number == number))
            .map(|i| i.labels.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn list_labels(&self, repo: &Repo, page: u32) -> Result<Page<Label>, TrackerError> {
        self.delay().await;
        let labels = self.labels(repo);
        Ok(self.page(&labels, page))
    }

    async fn create_label(
        &self,
        repo: &Repo,
        name: &str,
        color: &str,
    ) -> Result<Label, TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::CreateLabel(name.to_string()));
        let labels = s.labels.entry(repo.clone()).or_default();
        if labels.iter().any(|l| l.name == name) {
            return Err(unprocessable("Validation Failed: already_exists"));
        }
        let label = Label {
            name: name.to_string(),
            color: color.to_string(),
        };
        labels.push(label.clone());
        Ok(label)
    }

    async fn add_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::AddLabels {
            issue: issue_number,
            labels: labels.to_vec(),
        });
        let colors: Vec<Label> = labels
            .iter()
            .map(|name| Label {
                name: name.clone(),
                color: s.label_color(repo, name),
            })
            .collect();
        let issue = s.issue_mut(repo, issue_number)?;
        for label in colors {
            if !issue.labels.iter().any(|l| l.name == label.name) {
                issue.labels.push(label);
            }
        }
        Ok(())
    }

    async fn remove_label(
        &self,
        repo: &Repo,
        issue_number: u64,
        label: &str,
    ) -> Result<(), TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::RemoveLabel {
            issue: issue_number,
            label: label.to_string(),
        });
        let issue = s.issue_mut(repo, issue_number)?;
        let before = issue.labels.len();
        issue.labels.retain(|l| l.name != label);
        if issue.labels.len() == before {
            return Err(not_found(format!("label {label}")));
        }
        Ok(())
    }

    async fn list_issue_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        page: u32,
    ) -> Result<Page<Label>, TrackerError> {
        self.delay().await;
        let labels = self.state().issue_mut(repo, issue_number)?.labels.clone();
        Ok(self.page(&labels, page))
    }

    async fn list_boards(
        &self,
        repo: &Repo,
        scope: BoardScope,
        page: u32,
    ) -> Result<Page<Board>, TrackerError> {
        self.delay().await;
        let boards: Vec<Board> = self
            .boards(repo)
            .into_iter()
            .filter(|b| scope.includes(b.state))
            .collect();
        Ok(self.page(&boards, page))
    }

    async fn create_board(
        &self,
        repo: &Repo,
        name: &str,
        body: &str,
    ) -> Result<Board, TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::CreateBoard(name.to_string()));
        let board = Board {
            id: s.next_id(),
            name: name.to_string(),
            state: BoardState::Open,
            body: body.to_string(),
        };
        s.boards.push((repo.clone(), board.clone()));
        Ok(board)
    }

    async fn get_board(&self, board_id: u64) -> Result<Board, TrackerError> {
        self.delay().await;
        self.state().board(board_id).cloned()
    }

    async fn update_board_state(
        &self,
        board_id: u64,
        state: BoardState,
    ) -> Result<Board, TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::UpdateBoardState { board_id, state });
        let (_, board) = s
            .boards
            .iter_mut()
            .find(|(_, b)| b.id == board_id)
            .ok_or_else(|| not_found(format!("board {board_id}")))?;
        board.state = state;
        Ok(board.clone())
    }

    async fn list_columns(&self, board_id: u64, page: u32) -> Result<Page<Column>, TrackerError> {
        self.delay().await;
        self.state().board(board_id)?;
        let columns = self.columns(board_id);
        Ok(self.page(&columns, page))
    }

    async fn get_column(&self, column_id: u64) -> Result<Column, TrackerError> {
        self.delay().await;
        self.state().column(column_id).cloned()
    }

    async fn create_column(&self, board_id: u64, name: &str) -> Result<Column, TrackerError> {
        self.delay().await;
        {
            let mut s = self.state();
            s.calls.push(Call::CreateColumn {
                board_id,
                name: name.to_string(),
            });
            s.board(board_id)?;
        }
        Ok(self.add_column(board_id, name))
    }

    async fn list_cards(&self, column_id: u64, page: u32) -> Result<Page<Card>, TrackerError> {
        self.delay().await;
        self.state().column(column_id)?;
        let cards = self.cards(column_id);
        Ok(self.page(&cards, page))
    }

    async fn create_card(
        &self,
        column_id: u64,
        content: CardContent,
    ) -> Result<Card, TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::CreateCard {
            column_id,
            content_id: content.id,
            content_type: content.content_type,
        });
        if let Some(status) = s.card_failures.get(&content.id) {
            return Err(TrackerError::Api {
                status: *status,
                message: "card creation rejected".to_string(),
            });
        }
        let board_id = s.column(column_id)?.board_id;
        let url = s
            .issue_for(content)
            .map(|i| i.url.clone())
            .ok_or_else(|| unprocessable("Could not resolve to a node"))?;
        if s
            .board_cards(board_id)
            .any(|c| c.content_url.as_deref() == Some(url.as_str()))
        {
            return Err(unprocessable("Project already has the associated issue"));
        }
        let card = Card {
            id: s.next_id(),
            column_id,
            content_url: Some(url),
        };
        s.cards.entry(column_id).or_default().insert(0, card.clone());
        Ok(card)
    }

    async fn move_card(&self, card_id: u64, column_id: u64) -> Result<(), TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::MoveCard { card_id, column_id });
        s.column(column_id)?;
        let mut moved = None;
        for cards in s.cards.values_mut() {
            if let Some(index) = cards.iter().position(|c| c.id == card_id) {
                moved = Some(cards.remove(index));
                break;
            }
        }
        let mut card = moved.ok_or_else(|| not_found(format!("card {card_id}")))?;
        card.column_id = column_id;
        s.cards.entry(column_id).or_default().insert(0, card);
        Ok(())
    }

    async fn delete_card(&self, card_id: u64) -> Result<(), TrackerError> {
        self.delay().await;
        let mut s = self.state();
        s.calls.push(Call::DeleteCard(card_id));
        for cards in s.cards.values_mut() {
            if let Some(index) = cards.iter().position(|c| c.id == card_id) {
                cards.remove(index);
                return Ok(());
            }
        }
        Err(not_found(format!("card {card_id}")))
    }

    async fn list_issues(&self, repo: &Repo, page: u32) -> Result<Page<Issue>, TrackerError> {
        self.delay().await;
        // The issues API only knows issue ids, pull requests included.
        let issues: Vec<Issue> = self
            .state()
            .issues
            .get(repo)
            .into_iter()
            .flatten()
            .map(|issue| Issue {
                pull_request_id: None,
                ..issue.clone()
            })
            .collect();
        Ok(self.page(&issues, page))
    }
}
