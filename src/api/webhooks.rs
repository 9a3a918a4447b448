use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::services::{IntakeOutcome, WebhookProcessorError};

fn reply(status: StatusCode, ok: bool) -> Response {
    (status, Json(serde_json::json!({ "ok": ok }))).into_response()
}

/// POST /webhooks/{provider}
///
/// The raw body is verified before it is parsed. Anything the sender should
/// not retry (credited, replayed, irrelevant) answers 200.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    let signature = state
        .webhooks
        .signature_header(&provider)
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok());

    match state
        .webhooks
        .process_webhook(&provider, signature, &body)
        .await
    {
        Ok(IntakeOutcome::Credited(tx)) => {
            info!(provider = %provider, transaction_id = %tx.id, "Webhook credited deposit");
            reply(StatusCode::OK, true)
        }
        Ok(IntakeOutcome::Duplicate) => {
            info!(provider = %provider, "Webhook already processed");
            reply(StatusCode::OK, true)
        }
        Ok(IntakeOutcome::Ignored(reason)) => {
            info!(provider = %provider, reason = %reason, "Webhook ignored");
            reply(StatusCode::OK, true)
        }
        Err(e @ WebhookProcessorError::Unauthorized { .. }) => {
            warn!(provider = %provider, error = %e, "Webhook unauthorized");
            reply(StatusCode::UNAUTHORIZED, false)
        }
        Err(e @ WebhookProcessorError::Malformed { .. }) => {
            warn!(provider = %provider, error = %e, "Malformed webhook");
            reply(StatusCode::BAD_REQUEST, false)
        }
        Err(e @ WebhookProcessorError::UnknownProvider(_)) => {
            warn!(provider = %provider, error = %e, "Webhook for unknown provider");
            reply(StatusCode::NOT_FOUND, false)
        }
        Err(WebhookProcessorError::Internal(e)) => {
            error!(provider = %provider, error = %e, "Webhook processing failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, false)
        }
    }
}
