//! Connection broker client.
//!
//! The broker (Composio) owns the OAuth handshake with Gmail and executes
//! actions on our behalf. All requests carry the `X-API-Key` header and
//! target `{base_url}/...`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// Action that sends an email through a Gmail connection.
pub const GMAIL_SEND_EMAIL: &str = "gmail_send_email";

/// Action used as a cheap liveness probe for a Gmail connection.
pub const GMAIL_GET_PROFILE: &str = "gmail_get_profile";

/// A broker-side identity that owns connections.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrokerEntity {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Result of starting an OAuth handshake.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedConnection {
    pub connection_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConnection {
    pub id: String,
    pub status: ConnectionState,
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Outgoing email handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Operations the integration service needs from a connection broker.
#[async_trait]
pub trait ConnectionBroker: Send + Sync {
    async fn create_entity(&self, name: &str) -> Result<BrokerEntity, BrokerError>;

    async fn initiate_connection(
        &self,
        entity_id: &str,
        integration_id: &str,
    ) -> Result<InitiatedConnection, BrokerError>;

    async fn get_connection(&self, connection_id: &str) -> Result<BrokerConnection, BrokerError>;

    async fn execute_action(
        &self,
        connection_id: &str,
        action: &str,
        input: Value,
    ) -> Result<Value, BrokerError>;

    async fn delete_connection(&self, connection_id: &str) -> Result<(), BrokerError>;

    /// Probe a Gmail connection. Any failure counts as "not working".
    async fn test_gmail_connection(&self, connection_id: &str) -> bool {
        match self
            .execute_action(connection_id, GMAIL_GET_PROFILE, json!({}))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(connection_id, error = %e, "Gmail connection test failed");
                false
            }
        }
    }

    async fn send_email(
        &self,
        connection_id: &str,
        email: &OutgoingEmail,
    ) -> Result<Value, BrokerError> {
        let input = serde_json::to_value(email)
            .map_err(|e| BrokerError::InvalidResponse(format!("encode email: {e}")))?;
        self.execute_action(connection_id, GMAIL_SEND_EMAIL, input)
            .await
    }
}

/// reqwest-backed Composio client.
pub struct ComposioBroker {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    redirect_url: String,
}

impl ComposioBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            redirect_url: config.redirect_url.clone(),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T, BrokerError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(method = %method, url = %url, "Broker request");

        let mut request = self
            .client
            .request(method, &url)
            .header("X-API-Key", self.api_key.expose_secret())
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        // DELETE answers with an empty body.
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| BrokerError::InvalidResponse(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl ConnectionBroker for ComposioBroker {
    async fn create_entity(&self, name: &str) -> Result<BrokerEntity, BrokerError> {
        self.request(
            reqwest::Method::POST,
            "/entities",
            Some(json!({ "name": name })),
        )
        .await
    }

    async fn initiate_connection(
        &self,
        entity_id: &str,
        integration_id: &str,
    ) -> Result<InitiatedConnection, BrokerError> {
        self.request(
            reqwest::Method::POST,
            "/connections/initiate",
            Some(json!({
                "entityId": entity_id,
                "integrationId": integration_id,
                "redirectUrl": self.redirect_url,
            })),
        )
        .await
    }

    async fn get_connection(&self, connection_id: &str) -> Result<BrokerConnection, BrokerError> {
        self.request(
            reqwest::Method::GET,
            &format!("/connections/{connection_id}"),
            None,
        )
        .await
    }

    async fn execute_action(
        &self,
        connection_id: &str,
        action: &str,
        input: Value,
    ) -> Result<Value, BrokerError> {
        self.request(
            reqwest::Method::POST,
            "/actions/execute",
            Some(json!({
                "connectionId": connection_id,
                "actionName": action,
                "input": input,
            })),
        )
        .await
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), BrokerError> {
        let _: Value = self
            .request(
                reqwest::Method::DELETE,
                &format!("/connections/{connection_id}"),
                None,
            )
            .await?;
        Ok(())
    }
}
