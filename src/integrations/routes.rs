//! Integration endpoints. Every route requires a configured broker.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::integrations::model::{
    ConnectionCallback, ConnectionStart, Integration, IntegrationStatus, IntegrationType,
    TestEmail,
};
use crate::server::{AppState, Owner};

pub fn integration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/type/{kind}", get(get_by_type))
        .route("/api/integrations/gmail/connect", post(connect_gmail))
        .route("/api/integrations/callback", post(connection_callback))
        .route("/api/integrations/{id}", delete(disconnect))
        .route("/api/integrations/{id}/status", get(status))
        .route("/api/integrations/{id}/test", post(test_connection))
        .route(
            "/api/integrations/{id}/send-test-email",
            post(send_test_email),
        )
}

async fn list_integrations(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Integration>>, ApiError> {
    Ok(Json(state.integrations()?.list(&owner).await?))
}

async fn get_by_type(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(kind): Path<IntegrationType>,
) -> Result<Json<Option<Integration>>, ApiError> {
    Ok(Json(state.integrations()?.get_by_type(&owner, kind).await?))
}

/// POST /api/integrations/gmail/connect
///
/// Returns the consent URL the browser should be sent to.
async fn connect_gmail(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ConnectionStart>, ApiError> {
    Ok(Json(state.integrations()?.connect_gmail(&owner).await?))
}

async fn connection_callback(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(callback): Json<ConnectionCallback>,
) -> Result<Json<Value>, ApiError> {
    let integration = state
        .integrations()?
        .handle_callback(&owner, callback)
        .await?;
    Ok(Json(json!({
        "success": integration.status == IntegrationStatus::Connected,
        "error": integration.error_message,
    })))
}

/// GET /api/integrations/{id}/status
///
/// Polled by the client while a handshake is pending.
async fn status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Integration>, ApiError> {
    Ok(Json(
        state.integrations()?.refresh_status(&owner, &id).await?,
    ))
}

async fn test_connection(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let working = state.integrations()?.test_connection(&owner, &id).await?;
    Ok(Json(json!({ "success": working })))
}

async fn disconnect(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.integrations()?.disconnect(&owner, &id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn send_test_email(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(email): Json<TestEmail>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .integrations()?
        .send_test_email(&owner, &id, email)
        .await?;
    Ok(Json(json!({ "success": true, "result": result })))
}
