//! GitHub tracker tests against a mock API server.

use release_bot::tracker::{collect_pages, BoardScope, BoardState, CardContent, ContentType, Repo};
use release_bot::{GitHubTracker, Tracker, TrackerError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repo() -> Repo {
    Repo::new("docker", "release-tracking")
}

async fn tracker(server: &MockServer) -> GitHubTracker {
    GitHubTracker::with_base_url("test-token", &server.uri()).unwrap()
}

#[tokio::test]
async fn test_requests_carry_auth_and_preview_media_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/12"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "application/vnd.github.inertia-preview+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "name": "18.09-ee",
            "state": "open",
            "body": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let board = tracker(&server).await.get_board(12).await.unwrap();
    assert_eq!(board.name, "18.09-ee");
    assert_eq!(board.state, BoardState::Open);
    assert!(board.body.is_empty());
}

#[tokio::test]
async fn test_listing_follows_link_header() {
    let server = MockServer::start().await;
    let next = format!(
        "<{}/repos/docker/release-tracking/labels?per_page=100&page=2>; rel=\"next\"",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/repos/docker/release-tracking/labels"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next.as_str())
                .set_body_json(json!([{ "name": "18.09-ee/triage", "color": "ededed" }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/docker/release-tracking/labels"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "name": "18.09-ee/cherry-pick", "color": "ededed" }])),
        )
        .mount(&server)
        .await;

    let tracker = tracker(&server).await;
    let repo = repo();
    let labels = collect_pages(|page| tracker.list_labels(&repo, page))
        .await
        .unwrap();

    let names: Vec<_> = labels.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["18.09-ee/triage", "18.09-ee/cherry-pick"]);
}

#[tokio::test]
async fn test_board_listing_passes_scope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/docker/release-tracking/projects"))
        .and(query_param("state", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "18.03-ce", "state": "closed", "body": "" },
            { "id": 2, "name": "18.09-ee", "state": "open", "body": "" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let page = tracker(&server)
        .await
        .list_boards(&repo(), BoardScope::All, 1)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].state, BoardState::Closed);
    assert_eq!(page.next_page, None);
}

#[tokio::test]
async fn test_columns_take_board_id_from_project_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/77/columns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 367,
            "name": "Triage",
            "project_url": "https://api.github.com/projects/77"
        }])))
        .mount(&server)
        .await;

    let page = tracker(&server).await.list_columns(77, 1).await.unwrap();
    assert_eq!(page.items[0].id, 367);
    assert_eq!(page.items[0].board_id, 77);
}

#[tokio::test]
async fn test_remove_missing_label_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/repos/docker/release-tracking/issues/42/labels/18\.09-ee"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Label does not exist" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = tracker(&server)
        .await
        .remove_label(&repo(), 42, "18.09-ee/triage")
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(
        err,
        TrackerError::Api { status: 404, ref message } if message == "Label does not exist"
    ));
}

#[tokio::test]
async fn test_create_card_sends_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/columns/367/cards"))
        .and(body_json(json!({ "content_id": 1001, "content_type": "PullRequest" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 9,
            "content_url": "https://api.github.com/repos/docker/release-tracking/issues/42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let card = tracker(&server)
        .await
        .create_card(
            367,
            CardContent {
                id: 1001,
                content_type: ContentType::PullRequest,
            },
        )
        .await
        .unwrap();

    assert_eq!(card.id, 9);
    assert_eq!(card.column_id, 367);
}

#[tokio::test]
async fn test_duplicate_card_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/columns/367/cards"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Validation Failed"
        })))
        .mount(&server)
        .await;

    let err = tracker(&server)
        .await
        .create_card(
            367,
            CardContent {
                id: 1001,
                content_type: ContentType::Issue,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
}

#[tokio::test]
async fn test_move_card_to_top() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/columns/cards/9/moves"))
        .and(body_json(json!({ "position": "top", "column_id": 368 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    tracker(&server)
        .await
        .move_card(9, 368)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_issue_listing_includes_closed_and_pull_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/docker/release-tracking/issues"))
        .and(query_param("state", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1001,
                "number": 42,
                "url": "https://api.github.com/repos/docker/release-tracking/issues/42",
                "labels": [{ "name": "priority/P1", "color": "ff0000" }]
            },
            {
                "id": 1002,
                "number": 43,
                "url": "https://api.github.com/repos/docker/release-tracking/issues/43",
                "labels": [],
                "pull_request": { "url": "https://api.github.com/repos/docker/release-tracking/pulls/43" }
            }
        ])))
        .mount(&server)
        .await;

    let page = tracker(&server).await.list_issues(&repo(), 1).await.unwrap();
    assert!(!page.items[0].is_pull_request);
    assert_eq!(page.items[0].labels[0].name, "priority/P1");
    assert!(page.items[1].is_pull_request);
    assert_eq!(
        page.items[1].card_content(),
        CardContent {
            id: 1002,
            content_type: ContentType::Issue,
        }
    );
}
