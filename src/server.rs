//! HTTP server wiring: shared state, owner extraction and the router.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::agents::routes::agent_routes;
use crate::error::{ApiError, BrokerError};
use crate::integrations::routes::integration_routes;
use crate::integrations::service::IntegrationService;
use crate::leads::processor::LeadProcessor;
use crate::leads::routes::lead_routes;
use crate::store::Database;
use crate::webhooks::routes::webhook_routes;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const OWNER_HEADER: &str = "x-user-id";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub processor: LeadProcessor,
    /// `None` when no connection broker is configured.
    pub integrations: Option<Arc<IntegrationService>>,
    /// Public base URL, used to build webhook URLs.
    pub app_url: String,
}

impl AppState {
    pub fn integrations(&self) -> Result<&IntegrationService, ApiError> {
        self.integrations
            .as_deref()
            .ok_or_else(|| BrokerError::NotConfigured.into())
    }
}

/// The calling user, taken from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".into()))
    }
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(webhook_routes())
        .merge(agent_routes())
        .merge(lead_routes())
        .merge(integration_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "closelead"
    }))
}
