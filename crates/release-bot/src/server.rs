//! HTTP server for GitHub webhooks.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, SubmitError};
use crate::events::Event;
use crate::webhooks::{verify_signature, DeliveryHeaders};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Queue reconciliation jobs go through.
    pub dispatcher: Dispatcher,
    /// Webhook signing secret; deliveries are not verified without one.
    pub webhook_secret: Option<String>,
}

type Reply = (StatusCode, Json<Value>);

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(github_webhook_handler))
        // Per-repository hook URLs from older installs.
        .route("/{owner}/{name}", post(repo_webhook_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint with dispatcher counters.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "jobs": state.dispatcher.stats(),
    }))
}

async fn github_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    accept_delivery(&state, &headers, &body)
}

async fn repo_webhook_handler(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    debug!(owner = %owner, name = %name, "Delivery on per-repository route");
    accept_delivery(&state, &headers, &body)
}

/// Verify, decode and queue one delivery.
///
/// Reconciliation runs after the response is sent; the status code only
/// says whether the event was queued.
fn accept_delivery(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Reply {
    let delivery = DeliveryHeaders::from_headers(headers);
    let delivery_id = delivery.delivery_id.as_deref().unwrap_or("unknown");
    let event_type = delivery.event_type.as_deref().unwrap_or("unknown");

    info!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received GitHub webhook"
    );

    if let Some(secret) = &state.webhook_secret {
        let Some(signature) = &delivery.signature else {
            warn!(delivery_id = %delivery_id, "Missing X-Hub-Signature-256 header");
            return reply(StatusCode::UNAUTHORIZED, "error", "missing signature");
        };
        if !verify_signature(body, signature, secret) {
            warn!(delivery_id = %delivery_id, "Invalid webhook signature");
            return reply(StatusCode::UNAUTHORIZED, "error", "signature did not match");
        }
        debug!("Webhook signature verified");
    }

    let Some(event_type) = delivery.event_type.as_deref() else {
        warn!(delivery_id = %delivery_id, "Missing X-GitHub-Event header");
        return reply(StatusCode::BAD_REQUEST, "error", "missing event type");
    };

    let event = match Event::from_webhook(event_type, body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(event_type = %event_type, "Ignoring unhandled webhook event");
            return reply(StatusCode::OK, "ignored", "unhandled_event");
        }
        Err(e) => {
            warn!(event_type = %event_type, error = %e, "Failed to parse webhook payload");
            return reply(StatusCode::BAD_REQUEST, "error", "bad webhook payload");
        }
    };

    let kind = event.kind();
    let repo = event.repo().to_string();
    match state.dispatcher.submit(event) {
        Ok(_) => {
            debug!(event = kind, repo = %repo, "Queued event");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "accepted", "event": kind })),
            )
        }
        Err(SubmitError::QueueFull) => {
            reply(StatusCode::SERVICE_UNAVAILABLE, "error", "event queue is full")
        }
        Err(SubmitError::Closed) => {
            reply(StatusCode::SERVICE_UNAVAILABLE, "error", "shutting down")
        }
    }
}

fn reply(status: StatusCode, outcome: &str, reason: &str) -> Reply {
    (status, Json(json!({ "status": outcome, "reason": reason })))
}
