//! Gmail integration lifecycle: connect, callback, status, test,
//! disconnect and test email.
//!
//! All operations are owner-scoped. An integration owned by someone else is
//! indistinguishable from a missing one.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::integrations::broker::{ConnectionBroker, ConnectionState, OutgoingEmail};
use crate::integrations::model::{
    CallbackStatus, ConnectionCallback, ConnectionStart, Integration, IntegrationStatus,
    IntegrationType, TestEmail,
};
use crate::store::Database;

/// Interval between status polls while a handshake is pending.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Broker-side integration id for Gmail.
const GMAIL_INTEGRATION_ID: &str = "gmail";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

/// Drives integrations through the connection broker.
pub struct IntegrationService {
    db: Arc<dyn Database>,
    broker: Arc<dyn ConnectionBroker>,
}

impl IntegrationService {
    pub fn new(db: Arc<dyn Database>, broker: Arc<dyn ConnectionBroker>) -> Self {
        Self { db, broker }
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Integration>, ApiError> {
        Ok(self.db.list_integrations(owner).await?)
    }

    pub async fn get_by_type(
        &self,
        owner: &str,
        integration_type: IntegrationType,
    ) -> Result<Option<Integration>, ApiError> {
        Ok(self
            .db
            .get_integration_by_type(owner, integration_type)
            .await?)
    }

    async fn owned(&self, owner: &str, id: &str) -> Result<Integration, ApiError> {
        self.db
            .get_integration(id)
            .await?
            .filter(|i| i.user_id == owner)
            .ok_or_else(|| ApiError::NotFound("Integration not found or unauthorized".into()))
    }

    /// Start (or restart) the Gmail OAuth handshake.
    ///
    /// Reuses the owner's existing Gmail integration and broker entity when
    /// present; otherwise creates both.
    pub async fn connect_gmail(&self, owner: &str) -> Result<ConnectionStart, ApiError> {
        let existing = self
            .db
            .get_integration_by_type(owner, IntegrationType::Gmail)
            .await?;

        let mut integration = match existing {
            Some(mut integration) => {
                if integration.entity_id.is_none() {
                    let entity = self.broker.create_entity(&entity_name(owner)).await?;
                    integration.entity_id = Some(entity.id);
                }
                integration
            }
            None => {
                let entity = self.broker.create_entity(&entity_name(owner)).await?;
                let integration = Integration::new(owner, IntegrationType::Gmail, entity.id);
                self.db.insert_integration(&integration).await?;
                integration
            }
        };

        let entity_id = integration.entity_id.clone().unwrap_or_default();
        let started = self
            .broker
            .initiate_connection(&entity_id, GMAIL_INTEGRATION_ID)
            .await?;

        integration.mark_pending(started.connection_id.clone());
        self.db.update_integration(&integration).await?;

        info!(
            integration_id = %integration.id,
            connection_id = %started.connection_id,
            "Gmail connection initiated"
        );
        Ok(ConnectionStart {
            integration_id: integration.id,
            redirect_url: started.redirect_url,
            connection_id: started.connection_id,
        })
    }

    /// Record the outcome of the OAuth redirect.
    pub async fn handle_callback(
        &self,
        owner: &str,
        callback: ConnectionCallback,
    ) -> Result<Integration, ApiError> {
        let mut integration = self
            .db
            .get_integration_by_connection(owner, &callback.connection_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Integration not found".into()))?;

        match callback.status {
            CallbackStatus::Success => {
                if self
                    .broker
                    .test_gmail_connection(&callback.connection_id)
                    .await
                {
                    integration.mark_connected();
                } else {
                    integration.mark_error("Connection test failed");
                }
            }
            CallbackStatus::Error => {
                let message = callback
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "Connection failed".to_string());
                integration.mark_error(message);
            }
        }

        self.db.update_integration(&integration).await?;
        info!(
            integration_id = %integration.id,
            status = integration.status.as_str(),
            "Connection callback handled"
        );
        Ok(integration)
    }

    /// Current status, asking the broker while the handshake is pending.
    pub async fn refresh_status(&self, owner: &str, id: &str) -> Result<Integration, ApiError> {
        let mut integration = self.owned(owner, id).await?;
        if integration.status != IntegrationStatus::Pending {
            return Ok(integration);
        }
        let Some(connection_id) = integration.connection_id.clone() else {
            return Ok(integration);
        };

        match self.broker.get_connection(&connection_id).await {
            Ok(connection) => match connection.status {
                ConnectionState::Active => integration.mark_connected(),
                ConnectionState::Error => integration.mark_error("Connection failed"),
                ConnectionState::Inactive => {
                    debug!(integration_id = id, "Connection still pending");
                    return Ok(integration);
                }
            },
            Err(e) => {
                warn!(integration_id = id, error = %e, "Failed to fetch connection status");
                return Ok(integration);
            }
        }

        self.db.update_integration(&integration).await?;
        Ok(integration)
    }

    /// Probe the connection and record the result.
    pub async fn test_connection(&self, owner: &str, id: &str) -> Result<bool, ApiError> {
        let mut integration = self.owned(owner, id).await?;
        let connection_id = integration
            .connection_id
            .clone()
            .ok_or_else(|| ApiError::NotFound("Integration not found or not connected".into()))?;

        let working = self.broker.test_gmail_connection(&connection_id).await;
        if working {
            integration.mark_connected();
        } else {
            integration.mark_error("Connection test failed");
        }
        self.db.update_integration(&integration).await?;
        Ok(working)
    }

    /// Tear down the broker connection and mark the integration disconnected.
    ///
    /// A failed broker deletion is logged and does not block the local
    /// state change.
    pub async fn disconnect(&self, owner: &str, id: &str) -> Result<Integration, ApiError> {
        let mut integration = self.owned(owner, id).await?;
        if let Some(connection_id) = integration.connection_id.as_deref() {
            if let Err(e) = self.broker.delete_connection(connection_id).await {
                warn!(integration_id = id, error = %e, "Failed to delete broker connection");
            }
        }
        integration.mark_disconnected();
        self.db.update_integration(&integration).await?;
        info!(integration_id = id, "Integration disconnected");
        Ok(integration)
    }

    /// Send an email through a connected Gmail integration.
    pub async fn send_test_email(
        &self,
        owner: &str,
        id: &str,
        email: TestEmail,
    ) -> Result<Value, ApiError> {
        if !is_valid_email(&email.to) {
            return Err(ApiError::Validation("Invalid email address".into()));
        }

        let not_connected = || ApiError::NotFound("Integration not found or not connected".into());
        let mut integration = match self.owned(owner, id).await {
            Ok(i) if i.status == IntegrationStatus::Connected => i,
            Ok(_) | Err(ApiError::NotFound(_)) => return Err(not_connected()),
            Err(e) => return Err(e),
        };
        let connection_id = integration.connection_id.clone().ok_or_else(not_connected)?;

        let result = self
            .broker
            .send_email(
                &connection_id,
                &OutgoingEmail {
                    to: email.to,
                    subject: email.subject,
                    body: email.body,
                },
            )
            .await?;

        let now = Utc::now();
        integration.last_sync_at = Some(now);
        integration.updated_at = now;
        self.db.update_integration(&integration).await?;
        Ok(result)
    }
}

fn entity_name(owner: &str) -> String {
    format!("user_{}_{}", owner, Utc::now().timestamp_millis())
}

/// Poll `fetch` every `interval` until the status leaves `pending` or
/// `max_attempts` fetches have been made. Returns the last status seen.
pub async fn poll_until_settled<F, Fut, E>(
    interval: Duration,
    max_attempts: u32,
    mut fetch: F,
) -> Result<IntegrationStatus, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<IntegrationStatus, E>>,
{
    let mut status = IntegrationStatus::Pending;
    for attempt in 1..=max_attempts {
        status = fetch().await?;
        if status.is_settled() {
            debug!(attempt, status = status.as_str(), "Integration settled");
            break;
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(status)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::error::BrokerError;
    use crate::integrations::broker::{BrokerConnection, BrokerEntity, InitiatedConnection};
    use crate::store::LibSqlBackend;

    /// Scriptable broker that records executed actions.
    pub(crate) struct MockBroker {
        pub connection_state: Mutex<ConnectionState>,
        pub actions_fail: bool,
        pub delete_fails: bool,
        pub entities_created: AtomicU32,
        pub actions: Mutex<Vec<(String, Value)>>,
    }

    impl Default for MockBroker {
        fn default() -> Self {
            Self {
                connection_state: Mutex::new(ConnectionState::Inactive),
                actions_fail: false,
                delete_fails: false,
                entities_created: AtomicU32::new(0),
                actions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConnectionBroker for MockBroker {
        async fn create_entity(&self, name: &str) -> Result<BrokerEntity, BrokerError> {
            let n = self.entities_created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BrokerEntity {
                id: format!("ent_{n}"),
                name: name.to_string(),
            })
        }

        async fn initiate_connection(
            &self,
            entity_id: &str,
            _integration_id: &str,
        ) -> Result<InitiatedConnection, BrokerError> {
            Ok(InitiatedConnection {
                connection_id: format!("conn_for_{entity_id}"),
                redirect_url: "https://oauth.example/consent".into(),
            })
        }

        async fn get_connection(
            &self,
            connection_id: &str,
        ) -> Result<BrokerConnection, BrokerError> {
            Ok(BrokerConnection {
                id: connection_id.to_string(),
                status: *self.connection_state.lock().unwrap(),
                entity_id: None,
            })
        }

        async fn execute_action(
            &self,
            _connection_id: &str,
            action: &str,
            input: Value,
        ) -> Result<Value, BrokerError> {
            self.actions.lock().unwrap().push((action.to_string(), input));
            if self.actions_fail {
                return Err(BrokerError::Api {
                    status: 401,
                    body: "token revoked".into(),
                });
            }
            Ok(json!({"successful": true}))
        }

        async fn delete_connection(&self, _connection_id: &str) -> Result<(), BrokerError> {
            if self.delete_fails {
                return Err(BrokerError::Api {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    async fn service(broker: MockBroker) -> (IntegrationService, Arc<MockBroker>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let broker = Arc::new(broker);
        (IntegrationService::new(db, broker.clone()), broker)
    }

    async fn connected(svc: &IntegrationService) -> ConnectionStart {
        let start = svc.connect_gmail("u1").await.unwrap();
        svc.handle_callback(
            "u1",
            ConnectionCallback {
                connection_id: start.connection_id.clone(),
                status: CallbackStatus::Success,
                error: None,
            },
        )
        .await
        .unwrap();
        start
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("jane@acme.com"));
        assert!(!is_valid_email("jane"));
        assert!(!is_valid_email("jane@acme"));
        assert!(!is_valid_email("ja ne@acme.com"));
    }

    #[tokio::test]
    async fn connect_creates_pending_integration() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        assert_eq!(start.connection_id, "conn_for_ent_1");
        assert_eq!(start.redirect_url, "https://oauth.example/consent");

        let integration = svc
            .get_by_type("u1", IntegrationType::Gmail)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(integration.id, start.integration_id);
        assert_eq!(integration.status, IntegrationStatus::Pending);
        assert_eq!(integration.connection_id.as_deref(), Some("conn_for_ent_1"));
        assert_eq!(broker.entities_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_reuses_integration_and_entity() {
        let (svc, broker) = service(MockBroker::default()).await;
        let first = svc.connect_gmail("u1").await.unwrap();
        let second = svc.connect_gmail("u1").await.unwrap();
        assert_eq!(first.integration_id, second.integration_id);
        assert_eq!(broker.entities_created.load(Ordering::SeqCst), 1);
        assert_eq!(svc.list("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_callback_connects() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = connected(&svc).await;
        let integration = svc.refresh_status("u1", &start.integration_id).await.unwrap();
        assert_eq!(integration.status, IntegrationStatus::Connected);
        assert!(integration.last_sync_at.is_some());
        assert_eq!(broker.actions.lock().unwrap()[0].0, "gmail_get_profile");
    }

    #[tokio::test]
    async fn callback_with_failing_test_marks_error() {
        let (svc, _) = service(MockBroker {
            actions_fail: true,
            ..Default::default()
        })
        .await;
        let start = svc.connect_gmail("u1").await.unwrap();
        let integration = svc
            .handle_callback(
                "u1",
                ConnectionCallback {
                    connection_id: start.connection_id,
                    status: CallbackStatus::Success,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(integration.status, IntegrationStatus::Error);
        assert_eq!(integration.error_message.as_deref(), Some("Connection test failed"));
    }

    #[tokio::test]
    async fn error_callback_records_message() {
        let (svc, _) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();

        let integration = svc
            .handle_callback(
                "u1",
                ConnectionCallback {
                    connection_id: start.connection_id.clone(),
                    status: CallbackStatus::Error,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(integration.error_message.as_deref(), Some("Connection failed"));

        let integration = svc
            .handle_callback(
                "u1",
                ConnectionCallback {
                    connection_id: start.connection_id,
                    status: CallbackStatus::Error,
                    error: Some("access_denied".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(integration.status, IntegrationStatus::Error);
        assert_eq!(integration.error_message.as_deref(), Some("access_denied"));
    }

    #[tokio::test]
    async fn callback_for_unknown_connection_is_404() {
        let (svc, _) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        let err = svc
            .handle_callback(
                "u2",
                ConnectionCallback {
                    connection_id: start.connection_id,
                    status: CallbackStatus::Success,
                    error: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_status_follows_broker() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();

        let pending = svc.refresh_status("u1", &start.integration_id).await.unwrap();
        assert_eq!(pending.status, IntegrationStatus::Pending);

        *broker.connection_state.lock().unwrap() = ConnectionState::Active;
        let done = svc.refresh_status("u1", &start.integration_id).await.unwrap();
        assert_eq!(done.status, IntegrationStatus::Connected);
    }

    #[tokio::test]
    async fn refresh_status_broker_error_state() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        *broker.connection_state.lock().unwrap() = ConnectionState::Error;
        let failed = svc.refresh_status("u1", &start.integration_id).await.unwrap();
        assert_eq!(failed.status, IntegrationStatus::Error);
    }

    #[tokio::test]
    async fn foreign_integration_is_not_found() {
        let (svc, _) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        let err = svc.refresh_status("u2", &start.integration_id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Integration not found or unauthorized");
    }

    #[tokio::test]
    async fn disconnect_ignores_broker_failure() {
        let (svc, _) = service(MockBroker {
            delete_fails: true,
            ..Default::default()
        })
        .await;
        let start = connected(&svc).await;
        let integration = svc.disconnect("u1", &start.integration_id).await.unwrap();
        assert_eq!(integration.status, IntegrationStatus::Disconnected);
        assert!(integration.connection_id.is_none());
    }

    #[tokio::test]
    async fn test_connection_requires_connection_id() {
        let (svc, _) = service(MockBroker::default()).await;
        let start = connected(&svc).await;
        assert!(svc.test_connection("u1", &start.integration_id).await.unwrap());

        svc.disconnect("u1", &start.integration_id).await.unwrap();
        let err = svc
            .test_connection("u1", &start.integration_id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_test_email_requires_connected() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        let email = || TestEmail {
            to: "jane@acme.com".into(),
            subject: "Hello".into(),
            body: "Testing".into(),
        };

        let err = svc
            .send_test_email("u1", &start.integration_id, email())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        svc.handle_callback(
            "u1",
            ConnectionCallback {
                connection_id: start.connection_id,
                status: CallbackStatus::Success,
                error: None,
            },
        )
        .await
        .unwrap();
        svc.send_test_email("u1", &start.integration_id, email())
            .await
            .unwrap();

        let actions = broker.actions.lock().unwrap();
        let (action, input) = actions.last().unwrap();
        assert_eq!(action, "gmail_send_email");
        assert_eq!(input["to"], "jane@acme.com");
    }

    #[tokio::test]
    async fn send_test_email_rejects_bad_address() {
        let (svc, _) = service(MockBroker::default()).await;
        let start = connected(&svc).await;
        let err = svc
            .send_test_email(
                "u1",
                &start.integration_id,
                TestEmail {
                    to: "not-an-email".into(),
                    subject: "s".into(),
                    body: "b".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn poll_stops_on_first_settled_status() {
        let calls = AtomicU32::new(0);
        let status = poll_until_settled(Duration::from_millis(1), 10, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, ApiError>(if n < 2 {
                    IntegrationStatus::Pending
                } else {
                    IntegrationStatus::Connected
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(status, IntegrationStatus::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let status = poll_until_settled(Duration::from_millis(1), 4, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ApiError>(IntegrationStatus::Pending) }
        })
        .await
        .unwrap();
        assert_eq!(status, IntegrationStatus::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn poll_against_service() {
        let (svc, broker) = service(MockBroker::default()).await;
        let start = svc.connect_gmail("u1").await.unwrap();
        *broker.connection_state.lock().unwrap() = ConnectionState::Active;

        let svc = &svc;
        let id = start.integration_id.as_str();
        let status = poll_until_settled(Duration::from_millis(1), 3, || async move {
            svc.refresh_status("u1", id).await.map(|i| i.status)
        })
        .await
        .unwrap();
        assert_eq!(status, IntegrationStatus::Connected);
    }
}
