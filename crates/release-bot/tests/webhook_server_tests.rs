//! End-to-end webhook tests: a real listener, signed deliveries and the
//! in-memory tracker standing in for GitHub.

use std::sync::Arc;
use std::time::Duration;

use release_bot::dispatch::DispatchConfig;
use release_bot::server::{build_router, AppState};
use release_bot::tracker::{BoardState, Column, Repo};
use release_bot::webhooks::sign;
use release_bot::{Dispatcher, Engine, MemoryTracker};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const SECRET: &str = "e2e-secret";

struct Harness {
    tracker: Arc<MemoryTracker>,
    repo: Repo,
    triage: Column,
    pick: Column,
    base_url: String,
    client: reqwest::Client,
}

async fn start() -> Harness {
    let tracker = Arc::new(MemoryTracker::new());
    let repo = Repo::new("docker", "release-tracking");
    let board = tracker.add_board(&repo, "18.09-ee-rc1", BoardState::Open);
    let triage = tracker.add_column(board.id, "Triage");
    let pick = tracker.add_column(board.id, "Cherry Pick");
    tracker.add_column(board.id, "Cherry Picked");

    let (dispatcher, _loop) = Dispatcher::start(Engine::new(tracker.clone()), DispatchConfig::default());
    let app = build_router(AppState {
        dispatcher,
        webhook_secret: Some(SECRET.to_string()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        tracker,
        repo,
        triage,
        pick,
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
    }
}

impl Harness {
    async fn deliver(&self, event: &str, payload: &Value) -> reqwest::StatusCode {
        let body = payload.to_string();
        self.client
            .post(format!("{}/webhooks/github", self.base_url))
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-github-delivery", "e2e")
            .header("x-hub-signature-256", sign(body.as_bytes(), SECRET))
            .body(body)
            .send()
            .await
            .unwrap()
            .status()
    }

    /// Wait for the background job to land; reconciliation runs after the reply.
    async fn eventually<F: Fn(&MemoryTracker) -> bool>(&self, done: F) {
        for _ in 0..100 {
            if done(&self.tracker) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("tracker never reached the expected state");
    }
}

fn repository() -> Value {
    json!({ "name": "release-tracking", "owner": { "login": "docker" } })
}

fn issue_json(id: u64, number: u64, labels: &[&str]) -> Value {
    json!({
        "id": id,
        "number": number,
        "url": format!("https://api.github.com/repos/docker/release-tracking/issues/{number}"),
        "labels": labels.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
    })
}

#[tokio::test]
async fn test_labeled_issue_gets_a_card() {
    let h = start().await;
    let issue = h.tracker.add_issue(&h.repo, 42, &["18.09-ee/triage"]);

    let status = h
        .deliver(
            "issues",
            &json!({
                "action": "labeled",
                "issue": issue_json(issue.id, 42, &["18.09-ee/triage"]),
                "label": { "name": "18.09-ee/triage" },
                "repository": repository()
            }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let triage = h.triage.id;
    h.eventually(|t| t.cards(triage).len() == 1).await;
    assert_eq!(
        h.tracker.cards(triage)[0].content_url.as_deref(),
        Some(issue.url.as_str())
    );
}

#[tokio::test]
async fn test_moved_card_relabels_issue() {
    let h = start().await;
    let issue = h.tracker.add_issue(&h.repo, 7, &["18.09-ee/triage"]);
    let card = h.tracker.add_card(h.pick.id, &issue);

    let status = h
        .deliver(
            "project_card",
            &json!({
                "action": "moved",
                "project_card": {
                    "id": card.id,
                    "column_id": h.pick.id,
                    "content_url": issue.url
                },
                "repository": repository()
            }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let repo = h.repo.clone();
    h.eventually(|t| t.issue_labels(&repo, 7) == vec!["18.09-ee/cherry-pick".to_string()])
        .await;
}

#[tokio::test]
async fn test_forged_delivery_changes_nothing() {
    let h = start().await;
    let body = json!({
        "action": "labeled",
        "issue": issue_json(1, 42, &[]),
        "label": { "name": "18.09-ee/triage" },
        "repository": repository()
    })
    .to_string();

    let status = h
        .client
        .post(format!("{}/webhooks/github", h.base_url))
        .header("x-github-event", "issues")
        .header("x-hub-signature-256", sign(body.as_bytes(), "not-the-secret"))
        .body(body)
        .send()
        .await
        .unwrap()
        .status();

    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = start().await;
    let health: Value = h
        .client
        .get(format!("{}/health", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "healthy");
    assert_eq!(health["jobs"]["failed"], 0);
}
