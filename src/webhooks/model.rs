//! Webhook data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of random bytes in a generated webhook secret.
const SECRET_BYTES: usize = 16;

/// Which form provider posts to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    Typeform,
    GoogleForms,
    Custom,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Typeform => "typeform",
            FormType::GoogleForms => "google_forms",
            FormType::Custom => "custom",
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "typeform" => Ok(FormType::Typeform),
            "google_forms" => Ok(FormType::GoogleForms),
            "custom" => Ok(FormType::Custom),
            other => Err(format!("unknown form type '{other}'")),
        }
    }
}

/// A named inbound endpoint owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    pub form_type: FormType,
    /// Free-text rubric handed to the scoring model.
    pub scoring_prompt: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// Create an active webhook. A secret is generated when none is supplied.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        form_type: FormType,
        scoring_prompt: impl Into<String>,
        secret: Option<String>,
        app_url: &str,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let secret = secret
            .filter(|s| !s.is_empty())
            .unwrap_or_else(generate_secret);
        Self {
            webhook_url: webhook_url(app_url, &id),
            id,
            user_id: user_id.into(),
            name: name.into(),
            webhook_secret: Some(secret),
            form_type,
            scoring_prompt: scoring_prompt.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether a caller presenting `provided` may post to this webhook.
    ///
    /// An unset or empty secret accepts everything; otherwise the header must
    /// match exactly.
    pub fn secret_matches(&self, provided: Option<&str>) -> bool {
        match self.webhook_secret.as_deref() {
            None | Some("") => true,
            Some(expected) => provided == Some(expected),
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: WebhookUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(form_type) = update.form_type {
            self.form_type = form_type;
        }
        if let Some(prompt) = update.scoring_prompt {
            self.scoring_prompt = prompt;
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        if let Some(secret) = update.webhook_secret {
            self.webhook_secret = Some(secret);
        }
    }
}

/// Public metadata returned by the verification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInfo {
    pub id: String,
    pub name: String,
    pub form_type: FormType,
    pub is_active: bool,
}

impl From<&Webhook> for WebhookInfo {
    fn from(w: &Webhook) -> Self {
        Self {
            id: w.id.clone(),
            name: w.name.clone(),
            form_type: w.form_type,
            is_active: w.is_active,
        }
    }
}

/// Body of `POST /api/webhooks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWebhook {
    pub name: String,
    pub form_type: FormType,
    #[serde(default)]
    pub scoring_prompt: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Body of `PATCH /api/webhooks/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUpdate {
    pub name: Option<String>,
    pub form_type: Option<FormType>,
    pub scoring_prompt: Option<String>,
    pub is_active: Option<bool>,
    pub webhook_secret: Option<String>,
}

/// 16 random bytes rendered as lowercase hex.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Public URL form providers post to.
pub fn webhook_url(app_url: &str, webhook_id: &str) -> String {
    format!("{}/api/webhook/{}", app_url.trim_end_matches('/'), webhook_id)
}
