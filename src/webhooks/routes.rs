//! Webhook endpoints: public intake plus owner-scoped CRUD.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::leads::model::score_value;
use crate::server::{AppState, Owner};
use crate::store::Database;
use crate::webhooks::model::{NewWebhook, Webhook, WebhookInfo, WebhookUpdate, generate_secret};

/// Optional header form providers use to authenticate deliveries.
pub const SECRET_HEADER: &str = "x-webhook-secret";

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/webhook/{id}",
            post(receive_submission).get(verify_webhook),
        )
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/api/webhooks/{id}",
            patch(update_webhook).delete(delete_webhook),
        )
        .route(
            "/api/webhooks/{id}/regenerate-secret",
            post(regenerate_secret),
        )
}

// ── Intake ──────────────────────────────────────────────────────────────

/// POST /api/webhook/{id}
///
/// Accepts an arbitrary JSON submission, scores it and stores the lead.
async fn receive_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    let webhook = state.processor.authorize(&id, secret).await?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        debug!(webhook_id = %id, error = %e, "Rejected non-JSON body");
        ApiError::Validation("Invalid JSON body".into())
    })?;

    let outcome = state
        .processor
        .process(&webhook, payload)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "leadId": outcome.lead_id,
        "score": score_value(outcome.score),
        "triggeredAgents": outcome.triggered_agents,
        "message": format!("Lead processed successfully with score {}/10", outcome.score),
    })))
}

/// GET /api/webhook/{id}
///
/// Lets form providers check the URL before sending real data.
async fn verify_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let webhook = state
        .db
        .get_webhook(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook not found".into()))?;

    Ok(Json(json!({
        "success": true,
        "webhook": WebhookInfo::from(&webhook),
        "message": "Webhook is ready to receive data",
    })))
}

// ── CRUD ────────────────────────────────────────────────────────────────

async fn owned_webhook(db: &dyn Database, id: &str, owner: &str) -> Result<Webhook, ApiError> {
    db.get_webhook(id)
        .await?
        .filter(|w| w.user_id == owner)
        .ok_or_else(|| ApiError::NotFound("Webhook not found or unauthorized".into()))
}

async fn list_webhooks(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Webhook>>, ApiError> {
    Ok(Json(state.db.list_webhooks(&owner).await?))
}

/// POST /api/webhooks
///
/// Creating a webhook also marks the owner as onboarded.
async fn create_webhook(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(body): Json<NewWebhook>,
) -> Result<(StatusCode, Json<Webhook>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Webhook name is required".into()));
    }

    let webhook = Webhook::new(
        owner.as_str(),
        name,
        body.form_type,
        body.scoring_prompt,
        body.webhook_secret,
        &state.app_url,
    );
    state.db.insert_webhook(&webhook).await?;
    state.db.mark_user_onboarded(&owner).await?;

    info!(webhook_id = %webhook.id, user_id = %owner, "Webhook created");
    Ok((StatusCode::CREATED, Json(webhook)))
}

async fn update_webhook(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(update): Json<WebhookUpdate>,
) -> Result<Json<Webhook>, ApiError> {
    if matches!(update.name, Some(ref n) if n.trim().is_empty()) {
        return Err(ApiError::Validation("Webhook name cannot be empty".into()));
    }

    let mut webhook = owned_webhook(state.db.as_ref(), &id, &owner).await?;
    webhook.apply(update);
    state.db.update_webhook(&webhook).await?;
    Ok(Json(webhook))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_webhook(state.db.as_ref(), &id, &owner).await?;
    state.db.delete_webhook(&id).await?;
    info!(webhook_id = %id, user_id = %owner, "Webhook deleted");
    Ok(Json(json!({ "success": true })))
}

/// POST /api/webhooks/{id}/regenerate-secret
///
/// The old secret stops working immediately.
async fn regenerate_secret(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Webhook>, ApiError> {
    let mut webhook = owned_webhook(state.db.as_ref(), &id, &owner).await?;
    webhook.webhook_secret = Some(generate_secret());
    state.db.update_webhook(&webhook).await?;
    info!(webhook_id = %id, "Webhook secret regenerated");
    Ok(Json(webhook))
}
