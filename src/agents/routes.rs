//! Agent CRUD endpoints. All routes are scoped to the calling owner.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;

use crate::agents::model::{Agent, AgentUpdate, AgentWithWebhooks, NewAgent};
use crate::error::ApiError;
use crate::server::{AppState, Owner};
use crate::store::Database;

pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/api/agents", get(list_agents).post(create_agent))
        .route(
            "/api/agents/{id}",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
}

async fn owned_agent(db: &dyn Database, id: &str, owner: &str) -> Result<Agent, ApiError> {
    db.get_agent(id)
        .await?
        .filter(|a| a.user_id == owner)
        .ok_or_else(|| ApiError::NotFound("Agent not found or unauthorized".into()))
}

/// Every id must name a webhook the caller owns.
async fn check_webhooks_owned(
    db: &dyn Database,
    webhook_ids: &[String],
    owner: &str,
) -> Result<(), ApiError> {
    for id in webhook_ids {
        let owned = db
            .get_webhook(id)
            .await?
            .is_some_and(|w| w.user_id == owner);
        if !owned {
            return Err(ApiError::NotFound(
                "One or more webhooks not found or unauthorized".into(),
            ));
        }
    }
    Ok(())
}

async fn with_webhooks(db: &dyn Database, agent: Agent) -> Result<AgentWithWebhooks, ApiError> {
    let webhooks = db.get_agent_webhooks(&agent.id).await?;
    Ok(AgentWithWebhooks { agent, webhooks })
}

async fn list_agents(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<AgentWithWebhooks>>, ApiError> {
    let agents = state.db.list_agents(&owner).await?;
    let mut out = Vec::with_capacity(agents.len());
    for agent in agents {
        out.push(with_webhooks(state.db.as_ref(), agent).await?);
    }
    Ok(Json(out))
}

async fn get_agent(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<AgentWithWebhooks>, ApiError> {
    let agent = owned_agent(state.db.as_ref(), &id, &owner).await?;
    Ok(Json(with_webhooks(state.db.as_ref(), agent).await?))
}

async fn create_agent(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(body): Json<NewAgent>,
) -> Result<(StatusCode, Json<AgentWithWebhooks>), ApiError> {
    body.validate()?;
    check_webhooks_owned(state.db.as_ref(), &body.webhook_ids, &owner).await?;

    let agent = Agent::from_new(owner.as_str(), &body);
    state.db.insert_agent(&agent, &body.webhook_ids).await?;

    info!(agent_id = %agent.id, user_id = %owner, webhooks = body.webhook_ids.len(), "Agent created");
    Ok((
        StatusCode::CREATED,
        Json(with_webhooks(state.db.as_ref(), agent).await?),
    ))
}

/// PATCH /api/agents/{id}
///
/// `webhookIds`, when present, replaces the whole association set.
async fn update_agent(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(update): Json<AgentUpdate>,
) -> Result<Json<AgentWithWebhooks>, ApiError> {
    update.validate()?;
    let mut agent = owned_agent(state.db.as_ref(), &id, &owner).await?;
    if let Some(ref ids) = update.webhook_ids {
        check_webhooks_owned(state.db.as_ref(), ids, &owner).await?;
    }

    agent.apply(&update);
    state
        .db
        .update_agent(&agent, update.webhook_ids.as_deref())
        .await?;
    Ok(Json(with_webhooks(state.db.as_ref(), agent).await?))
}

async fn delete_agent(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_agent(state.db.as_ref(), &id, &owner).await?;
    state.db.delete_agent(&id).await?;
    info!(agent_id = %id, user_id = %owner, "Agent deleted");
    Ok(Json(json!({ "success": true })))
}
