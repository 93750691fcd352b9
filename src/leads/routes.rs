//! Owner-scoped lead endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::leads::model::{Lead, LeadStatusUpdate, Message};
use crate::server::{AppState, Owner};
use crate::store::Database;

pub fn lead_routes() -> Router<AppState> {
    Router::new()
        .route("/api/leads", get(list_leads))
        .route("/api/leads/{id}", get(get_lead))
        .route("/api/leads/{id}/status", patch(update_status))
        .route("/api/leads/{id}/messages", get(list_messages))
}

async fn owned_lead(db: &dyn Database, id: &str, owner: &str) -> Result<Lead, ApiError> {
    db.get_lead(id)
        .await?
        .filter(|l| l.user_id == owner)
        .ok_or_else(|| ApiError::NotFound("Lead not found or unauthorized".into()))
}

/// GET /api/leads, newest first.
async fn list_leads(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<Lead>>, ApiError> {
    Ok(Json(state.db.list_leads(&owner).await?))
}

async fn get_lead(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Lead>, ApiError> {
    Ok(Json(owned_lead(state.db.as_ref(), &id, &owner).await?))
}

async fn update_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<LeadStatusUpdate>,
) -> Result<Json<Lead>, ApiError> {
    owned_lead(state.db.as_ref(), &id, &owner).await?;
    state.db.update_lead_status(&id, body.status).await?;
    Ok(Json(owned_lead(state.db.as_ref(), &id, &owner).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    owned_lead(state.db.as_ref(), &id, &owner).await?;
    Ok(Json(state.db.list_messages_for_lead(&id).await?))
}
