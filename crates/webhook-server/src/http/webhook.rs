use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use shared::inbound::WebhookPayload;
use tracing::{debug, info, warn};

use super::AppState;
use super::errors::forbidden_response;

#[derive(Debug, Default, Deserialize)]
pub(super) struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Subscription handshake: echo the challenge only for a `subscribe` request
/// carrying our verify token.
pub(super) async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    match verified_challenge(&query, &state.verify_token) {
        Some(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            warn!(mode = ?query.mode, "webhook verification rejected");
            forbidden_response()
        }
    }
}

/// Acknowledges immediately and processes the batch on a detached task.
pub(super) async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    tokio::spawn(async move {
        let payload = match serde_json::from_slice::<WebhookPayload>(&body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("ignoring undecodable webhook body: {err}");
                return;
            }
        };
        let batch = payload.into_batch();
        debug!(
            events = batch.events.len(),
            statuses = batch.statuses.len(),
            "processing webhook batch"
        );
        state.dispatcher.process_batch(batch).await;
    });

    (StatusCode::OK, Json(json!({ "status": "received" }))).into_response()
}

fn verified_challenge(query: &VerifyQuery, verify_token: &str) -> Option<String> {
    if query.mode.as_deref() != Some("subscribe") {
        return None;
    }
    if query.verify_token.as_deref() != Some(verify_token) {
        return None;
    }
    Some(query.challenge.clone().unwrap_or_default())
}
