//! Agent data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::webhooks::model::FormType;

/// What an agent does with a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    ResponseAgent,
    FollowupAgent,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ResponseAgent => "response_agent",
            AgentType::FollowupAgent => "followup_agent",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_agent" => Ok(AgentType::ResponseAgent),
            "followup_agent" => Ok(AgentType::FollowupAgent),
            other => Err(format!("unknown agent type '{other}'")),
        }
    }
}

/// A reference link an agent may include in its outreach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLink {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A user-configured automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub links: Vec<AgentLink>,
    pub metadata: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Build an active agent from a validated create request.
    pub fn from_new(user_id: impl Into<String>, new: &NewAgent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: new.name.trim().to_string(),
            description: new.description.clone(),
            system_prompt: new.system_prompt.clone(),
            agent_type: new.agent_type,
            links: new.links.clone(),
            metadata: new.metadata.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the scalar fields of an update; the webhook set is handled by the store.
    pub fn apply(&mut self, update: &AgentUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(ref description) = update.description {
            self.description = Some(description.clone());
        }
        if let Some(ref prompt) = update.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(agent_type) = update.agent_type {
            self.agent_type = agent_type;
        }
        if let Some(ref metadata) = update.metadata {
            self.metadata = Some(metadata.clone());
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        if let Some(ref links) = update.links {
            self.links = links.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Short webhook description attached to agent listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    pub id: String,
    pub name: String,
    pub form_type: FormType,
}

/// An agent together with the webhooks that trigger it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentWithWebhooks {
    #[serde(flatten)]
    pub agent: Agent,
    pub webhooks: Vec<WebhookSummary>,
}

/// Body of `POST /api/agents`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub webhook_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub links: Vec<AgentLink>,
}

impl NewAgent {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("Agent name is required".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(ApiError::Validation("System prompt is required".into()));
        }
        if self.webhook_ids.is_empty() {
            return Err(ApiError::Validation(
                "At least one webhook must be selected".into(),
            ));
        }
        Ok(())
    }
}

/// Body of `PATCH /api/agents/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<AgentType>,
    /// Replaces the whole association set when present.
    pub webhook_ids: Option<Vec<String>>,
    pub metadata: Option<String>,
    pub is_active: Option<bool>,
    pub links: Option<Vec<AgentLink>>,
}

impl AgentUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        if matches!(self.name, Some(ref n) if n.trim().is_empty()) {
            return Err(ApiError::Validation("Agent name cannot be empty".into()));
        }
        if matches!(self.system_prompt, Some(ref p) if p.trim().is_empty()) {
            return Err(ApiError::Validation("System prompt cannot be empty".into()));
        }
        Ok(())
    }
}
