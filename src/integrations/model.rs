//! Integration data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Third-party service an integration connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    Gmail,
}

impl IntegrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Gmail => "gmail",
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(IntegrationType::Gmail),
            other => Err(format!("unknown integration type '{other}'")),
        }
    }
}

/// Connection state of an integration.
///
/// `Disconnected -> Pending -> Connected | Error`; any state may return to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[default]
    Disconnected,
    Pending,
    Connected,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Disconnected => "disconnected",
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Error => "error",
        }
    }

    /// Pollers stop once the status leaves `Pending`.
    pub fn is_settled(&self) -> bool {
        !matches!(self, IntegrationStatus::Pending)
    }
}

impl FromStr for IntegrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(IntegrationStatus::Disconnected),
            "pending" => Ok(IntegrationStatus::Pending),
            "connected" => Ok(IntegrationStatus::Connected),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(format!("unknown integration status '{other}'")),
        }
    }
}

/// A user's connection to a third-party service via the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    pub status: IntegrationStatus,
    /// Broker entity representing this user.
    pub entity_id: Option<String>,
    /// Broker connection, set once a handshake is initiated.
    pub connection_id: Option<String>,
    pub error_message: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(
        user_id: impl Into<String>,
        integration_type: IntegrationType,
        entity_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            integration_type,
            status: IntegrationStatus::Pending,
            entity_id: Some(entity_id.into()),
            connection_id: None,
            error_message: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_pending(&mut self, connection_id: impl Into<String>) {
        self.connection_id = Some(connection_id.into());
        self.status = IntegrationStatus::Pending;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_connected(&mut self) {
        let now = Utc::now();
        self.status = IntegrationStatus::Connected;
        self.error_message = None;
        self.last_sync_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = IntegrationStatus::Error;
        self.error_message = Some(message.into());
        self.last_sync_at = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_disconnected(&mut self) {
        self.status = IntegrationStatus::Disconnected;
        self.connection_id = None;
        self.error_message = None;
        self.last_sync_at = None;
        self.updated_at = Utc::now();
    }
}

/// Returned when a connection handshake starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStart {
    pub integration_id: String,
    pub redirect_url: String,
    pub connection_id: String,
}

/// Outcome reported by the OAuth callback page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Error,
}

/// Body of `POST /api/integrations/callback`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCallback {
    pub connection_id: String,
    pub status: CallbackStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /api/integrations/{id}/send-test-email`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}
