//! Lead intake pipeline.
//!
//! Flow:
//! 1. Authenticate the webhook call (exists, active, secret)
//! 2. Extract lead fields from the payload
//! 3. Score against the webhook's rubric (never fails)
//! 4. Resolve triggered agents and queue their messages
//! 5. Persist the lead and its messages in one transaction

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ApiError, DatabaseError};
use crate::leads::extract::extract_lead_fields;
use crate::leads::model::Lead;
use crate::leads::outbox::queue_messages;
use crate::leads::scoring::LeadScorer;
use crate::leads::triggers::resolve_triggered_agents;
use crate::store::Database;
use crate::webhooks::model::Webhook;

/// Result of one accepted webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeOutcome {
    pub lead_id: String,
    pub score: f64,
    pub triggered_agents: usize,
}

/// Runs inbound submissions through extraction, scoring, agent resolution
/// and persistence.
#[derive(Clone)]
pub struct LeadProcessor {
    db: Arc<dyn Database>,
    scorer: LeadScorer,
}

impl LeadProcessor {
    pub fn new(db: Arc<dyn Database>, scorer: LeadScorer) -> Self {
        Self { db, scorer }
    }

    /// Load the webhook and check it may accept a delivery.
    ///
    /// Checks run in order: existence, active flag, then secret.
    pub async fn authorize(
        &self,
        webhook_id: &str,
        secret: Option<&str>,
    ) -> Result<Webhook, ApiError> {
        let webhook = self
            .db
            .get_webhook(webhook_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Webhook not found".into()))?;

        if !webhook.is_active {
            return Err(ApiError::Forbidden("Webhook is inactive".into()));
        }
        if !webhook.secret_matches(secret) {
            debug!(webhook_id, "Rejected delivery with bad secret");
            return Err(ApiError::Unauthorized("Invalid webhook secret".into()));
        }
        Ok(webhook)
    }

    /// Turn an authorized delivery into a stored, scored lead.
    pub async fn process(
        &self,
        webhook: &Webhook,
        payload: Value,
    ) -> Result<IntakeOutcome, DatabaseError> {
        let fields = extract_lead_fields(&payload);
        let score = self.scorer.score(&payload, &webhook.scoring_prompt).await;
        let lead = Lead::new(webhook, fields, payload, score);

        let agents = resolve_triggered_agents(self.db.as_ref(), &webhook.id, lead.score).await?;
        let messages = queue_messages(&lead, &agents, lead.score);

        self.db.insert_lead_with_messages(&lead, &messages).await?;

        info!(
            lead_id = %lead.id,
            webhook_id = %webhook.id,
            score = lead.score,
            triggered_agents = agents.len(),
            "Lead processed"
        );

        Ok(IntakeOutcome {
            lead_id: lead.id,
            score: lead.score,
            triggered_agents: agents.len(),
        })
    }
}
