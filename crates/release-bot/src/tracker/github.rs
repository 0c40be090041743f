//! GitHub REST client for labels, issues and classic project boards.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{
    id_from_url, Board, BoardScope, BoardState, Card, CardContent, Column, Issue, Label, Page,
    Repo, Tracker, TrackerError,
};

pub const GITHUB_API_URL: &str = "https://api.github.com";

const PER_PAGE: &str = "100";

/// GitHub API client backing the [`Tracker`] trait.
#[derive(Debug, Clone)]
pub struct GitHubTracker {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
    #[serde(default)]
    color: String,
}

#[derive(Debug, Deserialize)]
struct GitHubProject {
    id: u64,
    name: String,
    state: BoardState,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubColumn {
    id: u64,
    name: String,
    project_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubCard {
    id: u64,
    #[serde(default)]
    content_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    id: u64,
    number: u64,
    url: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GitHubLabel> for Label {
    fn from(label: GitHubLabel) -> Self {
        Self {
            name: label.name,
            color: label.color,
        }
    }
}

impl From<GitHubProject> for Board {
    fn from(project: GitHubProject) -> Self {
        Self {
            id: project.id,
            name: project.name,
            state: project.state,
            body: project.body.unwrap_or_default(),
        }
    }
}

impl TryFrom<GitHubColumn> for Column {
    type Error = TrackerError;

    fn try_from(column: GitHubColumn) -> Result<Self, Self::Error> {
        let board_id = id_from_url(&column.project_url).ok_or_else(|| {
            TrackerError::InvalidResponse(format!(
                "column {} has unparseable project_url {}",
                column.id, column.project_url
            ))
        })?;
        Ok(Self {
            id: column.id,
            name: column.name,
            board_id,
        })
    }
}

impl From<GitHubIssue> for Issue {
    fn from(issue: GitHubIssue) -> Self {
        Self {
            id: issue.id,
            number: issue.number,
            url: issue.url,
            labels: issue.labels.into_iter().map(Label::from).collect(),
            is_pull_request: issue.pull_request.is_some(),
            pull_request_id: None,
        }
    }
}

impl GitHubTracker {
    /// Create a client against api.github.com.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self, TrackerError> {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    /// Create a client against another API root (GitHub Enterprise, tests).
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        // Classic projects still need the inertia preview media type.
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.inertia-preview+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("release-bot/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            token: token.to_string(),
        })
    }

    /// Build an API URL; every segment is percent-encoded on its own, so label
    /// names containing `/` stay a single segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// Send a request and turn non-success statuses into [`TrackerError::Api`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackerError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitHubError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        debug!(status = status.as_u16(), message = %message, "GitHub API error");
        Err(TrackerError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TrackerError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn page<T: DeserializeOwned>(
        &self,
        mut url: Url,
        page: u32,
        query: &[(&str, &str)],
    ) -> Result<Page<T>, TrackerError> {
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs
                .append_pair("per_page", PER_PAGE)
                .append_pair("page", &page.to_string());
        }

        let response = self.send(self.request(Method::GET, url)).await?;
        let next_page = next_page(response.headers());
        let bytes = response.bytes().await?;
        Ok(Page {
            items: serde_json::from_slice(&bytes)?,
            next_page,
        })
    }
}

/// Page number of the `rel="next"` entry of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        Url::parse(target)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

fn map_page<W, T>(page: Page<W>) -> Page<T>
where
    T: From<W>,
{
    Page {
        items: page.items.into_iter().map(T::from).collect(),
        next_page: page.next_page,
    }
}

#[async_trait]
impl Tracker for GitHubTracker {
    async fn list_labels(&self, repo: &Repo, page: u32) -> Result<Page<Label>, TrackerError> {
        let url = self.url(&["repos", &repo.owner, &repo.name, "labels"]);
        let page: Page<GitHubLabel> = self.page(url, page, &[]).await?;
        Ok(map_page(page))
    }

    async fn create_label(
        &self,
        repo: &Repo,
        name: &str,
        color: &str,
    ) -> Result<Label, TrackerError> {
        let url = self.url(&["repos", &repo.owner, &repo.name, "labels"]);
        let label: GitHubLabel = self
            .json(
                self.request(Method::POST, url)
                    .json(&json!({ "name": name, "color": color })),
            )
            .await?;
        Ok(label.into())
    }

    async fn add_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        if labels.is_empty() {
            return Ok(());
        }
        let number = issue_number.to_string();
        let url = self.url(&["repos", &repo.owner, &repo.name, "issues", &number, "labels"]);
        self.send(
            self.request(Method::POST, url)
                .json(&json!({ "labels": labels })),
        )
        .await?;
        Ok(())
    }

    async fn remove_label(
        &self,
        repo: &Repo,
        issue_number: u64,
        label: &str,
    ) -> Result<(), TrackerError> {
        let number = issue_number.to_string();
        let url = self.url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &number,
            "labels",
            label,
        ]);
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn list_issue_labels(
        &self,
        repo: &Repo,
        issue_number: u64,
        page: u32,
    ) -> Result<Page<Label>, TrackerError> {
        let number = issue_number.to_string();
        let url = self.url(&["repos", &repo.owner, &repo.name, "issues", &number, "labels"]);
        let page: Page<GitHubLabel> = self.page(url, page, &[]).await?;
        Ok(map_page(page))
    }

    async fn list_boards(
        &self,
        repo: &Repo,
        scope: BoardScope,
        page: u32,
    ) -> Result<Page<Board>, TrackerError> {
        let url = self.url(&["repos", &repo.owner, &repo.name, "projects"]);
        let page: Page<GitHubProject> = self
            .page(url, page, &[("state", scope.as_str())])
            .await?;
        Ok(map_page(page))
    }

    async fn create_board(
        &self,
        repo: &Repo,
        name: &str,
        body: &str,
    ) -> Result<Board, TrackerError> {
        let url = self.url(&["repos", &repo.owner, &repo.name, "projects"]);
        let project: GitHubProject = self
            .json(
                self.request(Method::POST, url)
                    .json(&json!({ "name": name, "body": body })),
            )
            .await?;
        Ok(project.into())
    }

    async fn get_board(&self, board_id: u64) -> Result<Board, TrackerError> {
        let id = board_id.to_string();
        let url = self.url(&["projects", &id]);
        let project: GitHubProject = self.json(self.request(Method::GET, url)).await?;
        Ok(project.into())
    }

    async fn update_board_state(
        &self,
        board_id: u64,
        state: BoardState,
    ) -> Result<Board, TrackerError> {
        let id = board_id.to_string();
        let url = self.url(&["projects", &id]);
        let project: GitHubProject = self
            .json(
                self.request(Method::PATCH, url)
                    .json(&json!({ "state": state.as_str() })),
            )
            .await?;
        Ok(project.into())
    }

    async fn list_columns(&self, board_id: u64, page: u32) -> Result<Page<Column>, TrackerError> {
        let id = board_id.to_string();
        let url = self.url(&["projects", &id, "columns"]);
        let page: Page<GitHubColumn> = self.page(url, page, &[]).await?;
        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(Column::try_from)
                .collect::<Result<_, _>>()?,
            next_page: page.next_page,
        })
    }

    async fn get_column(&self, column_id: u64) -> Result<Column, TrackerError> {
        let id = column_id.to_string();
        let url = self.url(&["projects", "columns", &id]);
        let column: GitHubColumn = self.json(self.request(Method::GET, url)).await?;
        column.try_into()
    }

    async fn create_column(&self, board_id: u64, name: &str) -> Result<Column, TrackerError> {
        let id = board_id.to_string();
        let url = self.url(&["projects", &id, "columns"]);
        let column: GitHubColumn = self
            .json(self.request(Method::POST, url).json(&json!({ "name": name })))
            .await?;
        column.try_into()
    }

    async fn list_cards(&self, column_id: u64, page: u32) -> Result<Page<Card>, TrackerError> {
        let id = column_id.to_string();
        let url = self.url(&["projects", "columns", &id, "cards"]);
        let page: Page<GitHubCard> = self.page(url, page, &[]).await?;
        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(|card| Card {
                    id: card.id,
                    column_id,
                    content_url: card.content_url,
                })
                .collect(),
            next_page: page.next_page,
        })
    }

    async fn create_card(
        &self,
        column_id: u64,
        content: CardContent,
    ) -> Result<Card, TrackerError> {
        let id = column_id.to_string();
        let url = self.url(&["projects", "columns", &id, "cards"]);
        let card: GitHubCard = self
            .json(self.request(Method::POST, url).json(&json!({
                "content_id": content.id,
                "content_type": content.content_type.as_str(),
            })))
            .await?;
        Ok(Card {
            id: card.id,
            column_id,
            content_url: card.content_url,
        })
    }

    async fn move_card(&self, card_id: u64, column_id: u64) -> Result<(), TrackerError> {
        let id = card_id.to_string();
        let url = self.url(&["projects", "columns", "cards", &id, "moves"]);
        self.send(self.request(Method::POST, url).json(&json!({
            "position": "top",
            "column_id": column_id,
        })))
        .await?;
        Ok(())
    }

    async fn delete_card(&self, card_id: u64) -> Result<(), TrackerError> {
        let id = card_id.to_string();
        let url = self.url(&["projects", "columns", "cards", &id]);
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn list_issues(&self, repo: &Repo, page: u32) -> Result<Page<Issue>, TrackerError> {
        let url = self.url(&["repos", &repo.owner, &repo.name, "issues"]);
        let page: Page<GitHubIssue> = self.page(url, page, &[("state", "all")]).await?;
        Ok(map_page(page))
    }
}
