//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;

use crate::agents::model::{Agent, WebhookSummary};
use crate::error::DatabaseError;
use crate::integrations::model::{Integration, IntegrationType};
use crate::leads::model::{Lead, LeadStatus, Message};
use crate::webhooks::model::Webhook;

/// Backend-agnostic database trait covering webhooks, leads, agents,
/// messages and integrations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Upsert the user row and set its onboarded flag.
    async fn mark_user_onboarded(&self, user_id: &str) -> Result<(), DatabaseError>;

    async fn is_user_onboarded(&self, user_id: &str) -> Result<bool, DatabaseError>;

    // ── Webhooks ────────────────────────────────────────────────────

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError>;

    /// Look a webhook up by id regardless of owner (used by intake).
    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, DatabaseError>;

    /// All webhooks of one owner, oldest first.
    async fn list_webhooks(&self, user_id: &str) -> Result<Vec<Webhook>, DatabaseError>;

    /// Overwrite the mutable columns of an existing webhook.
    async fn update_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError>;

    /// Delete a webhook and its agent associations. Returns false if absent.
    async fn delete_webhook(&self, id: &str) -> Result<bool, DatabaseError>;

    // ── Agents ──────────────────────────────────────────────────────

    /// Insert an agent together with its webhook associations.
    async fn insert_agent(&self, agent: &Agent, webhook_ids: &[String])
    -> Result<(), DatabaseError>;

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, DatabaseError>;

    async fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>, DatabaseError>;

    /// Overwrite an agent. When `webhook_ids` is `Some` the association set
    /// is replaced.
    async fn update_agent(
        &self,
        agent: &Agent,
        webhook_ids: Option<&[String]>,
    ) -> Result<(), DatabaseError>;

    /// Delete an agent and its associations. Returns false if absent.
    async fn delete_agent(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Webhooks associated with an agent, in association order.
    async fn get_agent_webhooks(&self, agent_id: &str)
    -> Result<Vec<WebhookSummary>, DatabaseError>;

    /// Active agents associated with a webhook, in association order.
    async fn get_active_agents_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<Agent>, DatabaseError>;

    // ── Leads & messages ────────────────────────────────────────────

    /// Persist a lead and its queued messages atomically.
    async fn insert_lead_with_messages(
        &self,
        lead: &Lead,
        messages: &[Message],
    ) -> Result<(), DatabaseError>;

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, DatabaseError>;

    /// All leads of one owner, newest first.
    async fn list_leads(&self, user_id: &str) -> Result<Vec<Lead>, DatabaseError>;

    /// Returns false if the lead does not exist.
    async fn update_lead_status(&self, id: &str, status: LeadStatus)
    -> Result<bool, DatabaseError>;

    async fn list_messages_for_lead(&self, lead_id: &str) -> Result<Vec<Message>, DatabaseError>;

    // ── Integrations ────────────────────────────────────────────────

    async fn insert_integration(&self, integration: &Integration) -> Result<(), DatabaseError>;

    async fn get_integration(&self, id: &str) -> Result<Option<Integration>, DatabaseError>;

    async fn get_integration_by_type(
        &self,
        user_id: &str,
        integration_type: IntegrationType,
    ) -> Result<Option<Integration>, DatabaseError>;

    async fn get_integration_by_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<Option<Integration>, DatabaseError>;

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<Integration>, DatabaseError>;

    async fn update_integration(&self, integration: &Integration) -> Result<(), DatabaseError>;
}
