// rest/routes/webhook.rs — the GitHub webhook sink.
//
// Signature verification runs over the raw body bytes before any JSON
// parsing; a bad signature answers 401 with zero side effects.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::webhook::{signature, WebhookPayload};
use crate::AppContext;

pub async fn receive(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !signature::verify_signature(&ctx.config.webhook_secret, &body, header) {
        let err = OrchestratorError::SignatureInvalid;
        warn!("webhook rejected: {err}");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": err.to_string() })),
        ));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(err = %e, "webhook rejected: unparseable payload");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid payload: {e}") })),
        )
    })?;

    info!(action = %payload.action, "webhook received");
    match ctx.webhook.handle(payload).await {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{e:#}") })),
        )),
    }
}
