//! Inbound tracker events.
//!
//! GitHub webhook deliveries are decoded into a closed [`Event`] set. Event
//! types and actions the bot does not react to decode to `None`.

use serde::Deserialize;

use crate::tracker::{Board, BoardState, Card, Issue, Label, Repo};

/// Something that happened on the tracker that may need reconciling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LabelAdded { repo: Repo, issue: Issue, label: String },
    LabelRemoved { repo: Repo, issue: Issue, label: String },
    IssueOpened { repo: Repo, issue: Issue },
    BoardCreated { repo: Repo, board: Board },
    CardCreated { repo: Repo, card: Card },
    CardMoved { repo: Repo, card: Card },
    CardDeleted { repo: Repo, card: Card },
}

impl Event {
    /// Short name used in logs and responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LabelAdded { .. } => "label_added",
            Self::LabelRemoved { .. } => "label_removed",
            Self::IssueOpened { .. } => "issue_opened",
            Self::BoardCreated { .. } => "board_created",
            Self::CardCreated { .. } => "card_created",
            Self::CardMoved { .. } => "card_moved",
            Self::CardDeleted { .. } => "card_deleted",
        }
    }

    #[must_use]
    pub const fn repo(&self) -> &Repo {
        match self {
            Self::LabelAdded { repo, .. }
            | Self::LabelRemoved { repo, .. }
            | Self::IssueOpened { repo, .. }
            | Self::BoardCreated { repo, .. }
            | Self::CardCreated { repo, .. }
            | Self::CardMoved { repo, .. }
            | Self::CardDeleted { repo, .. } => repo,
        }
    }

    /// Decode a webhook delivery given its `X-GitHub-Event` type.
    ///
    /// Returns `Ok(None)` for deliveries that need no reconciliation.
    pub fn from_webhook(event_type: &str, body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        match event_type {
            "issues" => serde_json::from_slice::<IssuesPayload>(body).map(IssuesPayload::into_event),
            "pull_request" => {
                serde_json::from_slice::<PullRequestPayload>(body).map(PullRequestPayload::into_event)
            }
            "project" => serde_json::from_slice::<ProjectPayload>(body).map(ProjectPayload::into_event),
            "project_card" => {
                serde_json::from_slice::<ProjectCardPayload>(body).map(ProjectCardPayload::into_event)
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

impl From<Repository> for Repo {
    fn from(repository: Repository) -> Self {
        Self::new(repository.owner.login, repository.name)
    }
}

#[derive(Debug, Deserialize)]
struct PayloadLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PayloadIssue {
    id: u64,
    number: u64,
    url: String,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<PayloadIssue> for Issue {
    fn from(issue: PayloadIssue) -> Self {
        Self {
            id: issue.id,
            number: issue.number,
            url: issue.url,
            labels: issue.labels,
            is_pull_request: issue.pull_request.is_some(),
            pull_request_id: None,
        }
    }
}

/// `issues` delivery.
#[derive(Debug, Deserialize)]
struct IssuesPayload {
    action: String,
    issue: PayloadIssue,
    #[serde(default)]
    label: Option<PayloadLabel>,
    repository: Repository,
}

impl IssuesPayload {
    fn into_event(self) -> Option<Event> {
        let repo = Repo::from(self.repository);
        let issue = Issue::from(self.issue);
        label_event(&self.action, repo, issue, self.label)
    }
}

#[derive(Debug, Deserialize)]
struct PayloadPullRequest {
    id: u64,
    number: u64,
    /// Cards point at the issue URL, not the pull request URL.
    issue_url: String,
    #[serde(default)]
    labels: Vec<Label>,
}

/// `pull_request` delivery.
#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PayloadPullRequest,
    #[serde(default)]
    label: Option<PayloadLabel>,
    repository: Repository,
}

impl PullRequestPayload {
    fn into_event(self) -> Option<Event> {
        let pr = self.pull_request;
        let issue = Issue {
            id: pr.id,
            number: pr.number,
            url: pr.issue_url,
            labels: pr.labels,
            is_pull_request: true,
            pull_request_id: Some(pr.id),
        };
        label_event(&self.action, Repo::from(self.repository), issue, self.label)
    }
}

fn label_event(action: &str, repo: Repo, issue: Issue, label: Option<PayloadLabel>) -> Option<Event> {
    match (action, label) {
        ("labeled", Some(label)) => Some(Event::LabelAdded {
            repo,
            issue,
            label: label.name,
        }),
        ("unlabeled", Some(label)) => Some(Event::LabelRemoved {
            repo,
            issue,
            label: label.name,
        }),
        ("opened", _) => Some(Event::IssueOpened { repo, issue }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct PayloadProject {
    id: u64,
    name: String,
    state: BoardState,
    #[serde(default)]
    body: Option<String>,
}

/// `project` delivery. Organization boards carry no repository and are ignored.
#[derive(Debug, Deserialize)]
struct ProjectPayload {
    action: String,
    project: PayloadProject,
    #[serde(default)]
    repository: Option<Repository>,
}

impl ProjectPayload {
    fn into_event(self) -> Option<Event> {
        if self.action != "created" {
            return None;
        }
        let project = self.project;
        Some(Event::BoardCreated {
            repo: self.repository?.into(),
            board: Board {
                id: project.id,
                name: project.name,
                state: project.state,
                body: project.body.unwrap_or_default(),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct PayloadCard {
    id: u64,
    column_id: u64,
    #[serde(default)]
    content_url: Option<String>,
}

/// `project_card` delivery.
#[derive(Debug, Deserialize)]
struct ProjectCardPayload {
    action: String,
    project_card: PayloadCard,
    #[serde(default)]
    repository: Option<Repository>,
}

impl ProjectCardPayload {
    fn into_event(self) -> Option<Event> {
        let repo = Repo::from(self.repository?);
        let card = Card {
            id: self.project_card.id,
            column_id: self.project_card.column_id,
            content_url: self.project_card.content_url,
        };
        match self.action.as_str() {
            "created" | "converted" => Some(Event::CardCreated { repo, card }),
            "moved" => Some(Event::CardMoved { repo, card }),
            "deleted" => Some(Event::CardDeleted { repo, card }),
            _ => None,
        }
    }
}
