//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases over a single shared
//! connection.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agents::model::{Agent, AgentLink, WebhookSummary};
use crate::error::DatabaseError;
use crate::integrations::model::{Integration, IntegrationType};
use crate::leads::model::{Lead, LeadScore, LeadStatus, Message};
use crate::store::migrations;
use crate::store::traits::Database;
use crate::webhooks::model::Webhook;

/// libSQL database backend.
///
/// Every statement, read or write, runs under `lock`. Transactions share the
/// single connection, so a read that slipped in while one is open would see
/// its uncommitted rows.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn begin(&self, ctx: &str) -> Result<Transaction, DatabaseError> {
        self.conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx} begin: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width so text ordering is time ordering.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<&DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(fmt_datetime(dt)),
        None => libsql::Value::Null,
    }
}

fn query_err(ctx: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{ctx}: {e}"))
}

fn parse_column<T: FromStr<Err = String>>(raw: &str, column: &str) -> Result<T, DatabaseError> {
    raw.parse()
        .map_err(|e: String| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

/// Drain a row cursor through a row mapper.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    ctx: &'static str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err(ctx))? {
        out.push(map(&row)?);
    }
    Ok(out)
}

/// Read at most one row through a row mapper.
async fn first_row<T>(
    mut rows: libsql::Rows,
    ctx: &'static str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await.map_err(query_err(ctx))? {
        Some(row) => Ok(Some(map(&row)?)),
        None => Ok(None),
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction,
    result: Result<T, DatabaseError>,
    ctx: &str,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{ctx} commit: {e}")))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, context = ctx, "Rollback failed");
            }
            Err(err)
        }
    }
}

async fn insert_agent_webhooks(
    conn: &Connection,
    agent_id: &str,
    webhook_ids: &[String],
) -> Result<(), DatabaseError> {
    for webhook_id in webhook_ids {
        conn.execute(
            "INSERT OR IGNORE INTO agent_webhooks (agent_id, webhook_id) VALUES (?1, ?2)",
            params![agent_id, webhook_id.as_str()],
        )
        .await
        .map_err(query_err("insert_agent_webhooks"))?;
    }
    Ok(())
}

// ── Row mapping ─────────────────────────────────────────────────────

const WEBHOOK_COLUMNS: &str =
    "id, user_id, name, webhook_url, webhook_secret, form_type, scoring_prompt, is_active, created_at";

const AGENT_COLUMNS: &str = "id, user_id, name, description, system_prompt, agent_type, links, metadata, is_active, created_at, updated_at";

const AGENT_COLUMNS_JOINED: &str = "a.id, a.user_id, a.name, a.description, a.system_prompt, a.agent_type, a.links, a.metadata, a.is_active, a.created_at, a.updated_at";

const LEAD_COLUMNS: &str = "id, user_id, webhook_id, webhook_name, name, email, phone, company, raw_data, score, score_breakdown, status, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, lead_id, user_id, agent_id, subject, content, status, created_at, sent_at";

const INTEGRATION_COLUMNS: &str = "id, user_id, integration_type, status, entity_id, connection_id, error_message, last_sync_at, created_at, updated_at";

fn row_to_webhook(row: &libsql::Row) -> Result<Webhook, DatabaseError> {
    let err = query_err("webhook row");
    let form_type: String = row.get(5).map_err(&err)?;
    let created_at: String = row.get(8).map_err(&err)?;
    Ok(Webhook {
        id: row.get(0).map_err(&err)?,
        user_id: row.get(1).map_err(&err)?,
        name: row.get(2).map_err(&err)?,
        webhook_url: row.get(3).map_err(&err)?,
        webhook_secret: row.get::<String>(4).ok(),
        form_type: parse_column(&form_type, "webhooks.form_type")?,
        scoring_prompt: row.get::<String>(6).unwrap_or_default(),
        is_active: row.get::<i64>(7).map_err(&err)? != 0,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_agent(row: &libsql::Row) -> Result<Agent, DatabaseError> {
    let err = query_err("agent row");
    let agent_type: String = row.get(5).map_err(&err)?;
    let links: String = row.get::<String>(6).unwrap_or_else(|_| "[]".to_string());
    let created_at: String = row.get(9).map_err(&err)?;
    let updated_at: String = row.get(10).map_err(&err)?;
    Ok(Agent {
        id: row.get(0).map_err(&err)?,
        user_id: row.get(1).map_err(&err)?,
        name: row.get(2).map_err(&err)?,
        description: row.get::<String>(3).ok(),
        system_prompt: row.get(4).map_err(&err)?,
        agent_type: parse_column(&agent_type, "agents.agent_type")?,
        links: from_json::<Vec<AgentLink>>(&links, "agents.links")?,
        metadata: row.get::<String>(7).ok(),
        is_active: row.get::<i64>(8).map_err(&err)? != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_lead(row: &libsql::Row) -> Result<Lead, DatabaseError> {
    let err = query_err("lead row");
    let raw_data: String = row.get(8).map_err(&err)?;
    let breakdown: String = row.get(10).map_err(&err)?;
    let status: String = row.get(11).map_err(&err)?;
    let created_at: String = row.get(12).map_err(&err)?;
    let updated_at: String = row.get(13).map_err(&err)?;
    Ok(Lead {
        id: row.get(0).map_err(&err)?,
        user_id: row.get(1).map_err(&err)?,
        webhook_id: row.get(2).map_err(&err)?,
        webhook_name: row.get(3).map_err(&err)?,
        name: row.get(4).map_err(&err)?,
        email: row.get(5).map_err(&err)?,
        phone: row.get::<String>(6).ok(),
        company: row.get::<String>(7).ok(),
        raw_data: from_json(&raw_data, "leads.raw_data")?,
        score: row.get::<f64>(9).map_err(&err)?,
        score_breakdown: from_json::<LeadScore>(&breakdown, "leads.score_breakdown")?,
        status: parse_column(&status, "leads.status")?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let err = query_err("message row");
    let status: String = row.get(6).map_err(&err)?;
    let created_at: String = row.get(7).map_err(&err)?;
    Ok(Message {
        id: row.get(0).map_err(&err)?,
        lead_id: row.get(1).map_err(&err)?,
        user_id: row.get(2).map_err(&err)?,
        agent_id: row.get(3).map_err(&err)?,
        subject: row.get(4).map_err(&err)?,
        content: row.get(5).map_err(&err)?,
        status: parse_column(&status, "messages.status")?,
        created_at: parse_datetime(&created_at),
        sent_at: parse_optional_datetime(row.get::<String>(8).ok()),
    })
}

fn row_to_integration(row: &libsql::Row) -> Result<Integration, DatabaseError> {
    let err = query_err("integration row");
    let integration_type: String = row.get(2).map_err(&err)?;
    let status: String = row.get(3).map_err(&err)?;
    let created_at: String = row.get(8).map_err(&err)?;
    let updated_at: String = row.get(9).map_err(&err)?;
    Ok(Integration {
        id: row.get(0).map_err(&err)?,
        user_id: row.get(1).map_err(&err)?,
        integration_type: parse_column(&integration_type, "integrations.integration_type")?,
        status: parse_column(&status, "integrations.status")?,
        entity_id: row.get::<String>(4).ok(),
        connection_id: row.get::<String>(5).ok(),
        error_message: row.get::<String>(6).ok(),
        last_sync_at: parse_optional_datetime(row.get::<String>(7).ok()),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_webhook_summary(row: &libsql::Row) -> Result<WebhookSummary, DatabaseError> {
    let err = query_err("webhook summary row");
    let form_type: String = row.get(2).map_err(&err)?;
    Ok(WebhookSummary {
        id: row.get(0).map_err(&err)?,
        name: row.get(1).map_err(&err)?,
        form_type: parse_column(&form_type, "webhooks.form_type")?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn mark_user_onboarded(&self, user_id: &str) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO users (id, onboarded) VALUES (?1, 1)
                 ON CONFLICT(id) DO UPDATE SET onboarded = 1",
                params![user_id],
            )
            .await
            .map_err(query_err("mark_user_onboarded"))?;
        Ok(())
    }

    async fn is_user_onboarded(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query("SELECT onboarded FROM users WHERE id = ?1", params![user_id])
            .await
            .map_err(query_err("is_user_onboarded"))?;
        match rows.next().await.map_err(query_err("is_user_onboarded"))? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err("is_user_onboarded"))? != 0),
            None => Ok(false),
        }
    }

    // ── Webhooks ────────────────────────────────────────────────────

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO webhooks ({WEBHOOK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    webhook.id.as_str(),
                    webhook.user_id.as_str(),
                    webhook.name.as_str(),
                    webhook.webhook_url.as_str(),
                    opt_text(webhook.webhook_secret.as_deref()),
                    webhook.form_type.as_str(),
                    webhook.scoring_prompt.as_str(),
                    i64::from(webhook.is_active),
                    fmt_datetime(&webhook.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_webhook"))?;

        debug!(webhook_id = %webhook.id, user_id = %webhook.user_id, "Webhook inserted");
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err("get_webhook"))?;
        first_row(rows, "get_webhook", row_to_webhook).await
    }

    async fn list_webhooks(&self, user_id: &str) -> Result<Vec<Webhook>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE user_id = ?1 ORDER BY created_at, rowid"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("list_webhooks"))?;
        collect_rows(rows, "list_webhooks", row_to_webhook).await
    }

    async fn update_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE webhooks SET name = ?1, webhook_secret = ?2, form_type = ?3,
                 scoring_prompt = ?4, is_active = ?5 WHERE id = ?6",
                params![
                    webhook.name.as_str(),
                    opt_text(webhook.webhook_secret.as_deref()),
                    webhook.form_type.as_str(),
                    webhook.scoring_prompt.as_str(),
                    i64::from(webhook.is_active),
                    webhook.id.as_str(),
                ],
            )
            .await
            .map_err(query_err("update_webhook"))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "webhook".into(),
                id: webhook.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.lock.lock().await;
        let tx = self.begin("delete_webhook").await?;
        let result = async {
            tx.execute(
                "DELETE FROM agent_webhooks WHERE webhook_id = ?1",
                params![id],
            )
            .await
            .map_err(query_err("delete_webhook associations"))?;
            let deleted = tx
                .execute("DELETE FROM webhooks WHERE id = ?1", params![id])
                .await
                .map_err(query_err("delete_webhook"))?;
            Ok::<_, DatabaseError>(deleted > 0)
        }
        .await;
        finish(tx, result, "delete_webhook").await
    }

    // ── Agents ──────────────────────────────────────────────────────

    async fn insert_agent(
        &self,
        agent: &Agent,
        webhook_ids: &[String],
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let links = to_json(&agent.links, "agents.links")?;
        let tx = self.begin("insert_agent").await?;
        let result = async {
            tx.execute(
                &format!(
                    "INSERT INTO agents ({AGENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    agent.id.as_str(),
                    agent.user_id.as_str(),
                    agent.name.as_str(),
                    opt_text(agent.description.as_deref()),
                    agent.system_prompt.as_str(),
                    agent.agent_type.as_str(),
                    links,
                    opt_text(agent.metadata.as_deref()),
                    i64::from(agent.is_active),
                    fmt_datetime(&agent.created_at),
                    fmt_datetime(&agent.updated_at),
                ],
            )
            .await
            .map_err(query_err("insert_agent"))?;
            insert_agent_webhooks(&tx, &agent.id, webhook_ids).await?;
            Ok::<_, DatabaseError>(())
        }
        .await;
        finish(tx, result, "insert_agent").await?;

        debug!(agent_id = %agent.id, webhooks = webhook_ids.len(), "Agent inserted");
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err("get_agent"))?;
        first_row(rows, "get_agent", row_to_agent).await
    }

    async fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE user_id = ?1 ORDER BY created_at, rowid"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("list_agents"))?;
        collect_rows(rows, "list_agents", row_to_agent).await
    }

    async fn update_agent(
        &self,
        agent: &Agent,
        webhook_ids: Option<&[String]>,
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let links = to_json(&agent.links, "agents.links")?;
        let tx = self.begin("update_agent").await?;
        let result = async {
            let changed = tx
                .execute(
                    "UPDATE agents SET name = ?1, description = ?2, system_prompt = ?3,
                     agent_type = ?4, links = ?5, metadata = ?6, is_active = ?7, updated_at = ?8
                     WHERE id = ?9",
                    params![
                        agent.name.as_str(),
                        opt_text(agent.description.as_deref()),
                        agent.system_prompt.as_str(),
                        agent.agent_type.as_str(),
                        links,
                        opt_text(agent.metadata.as_deref()),
                        i64::from(agent.is_active),
                        fmt_datetime(&agent.updated_at),
                        agent.id.as_str(),
                    ],
                )
                .await
                .map_err(query_err("update_agent"))?;
            if changed == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "agent".into(),
                    id: agent.id.clone(),
                });
            }

            if let Some(ids) = webhook_ids {
                tx.execute(
                    "DELETE FROM agent_webhooks WHERE agent_id = ?1",
                    params![agent.id.as_str()],
                )
                .await
                .map_err(query_err("update_agent associations"))?;
                insert_agent_webhooks(&tx, &agent.id, ids).await?;
            }
            Ok::<_, DatabaseError>(())
        }
        .await;
        finish(tx, result, "update_agent").await
    }

    async fn delete_agent(&self, id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.lock.lock().await;
        let tx = self.begin("delete_agent").await?;
        let result = async {
            tx.execute(
                "DELETE FROM agent_webhooks WHERE agent_id = ?1",
                params![id],
            )
            .await
            .map_err(query_err("delete_agent associations"))?;
            let deleted = tx
                .execute("DELETE FROM agents WHERE id = ?1", params![id])
                .await
                .map_err(query_err("delete_agent"))?;
            Ok::<_, DatabaseError>(deleted > 0)
        }
        .await;
        finish(tx, result, "delete_agent").await
    }

    async fn get_agent_webhooks(
        &self,
        agent_id: &str,
    ) -> Result<Vec<WebhookSummary>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                "SELECT w.id, w.name, w.form_type FROM agent_webhooks aw
                 JOIN webhooks w ON w.id = aw.webhook_id
                 WHERE aw.agent_id = ?1 ORDER BY aw.rowid",
                params![agent_id],
            )
            .await
            .map_err(query_err("get_agent_webhooks"))?;
        collect_rows(rows, "get_agent_webhooks", row_to_webhook_summary).await
    }

    async fn get_active_agents_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<Agent>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AGENT_COLUMNS_JOINED} FROM agent_webhooks aw
                     JOIN agents a ON a.id = aw.agent_id
                     WHERE aw.webhook_id = ?1 AND a.is_active = 1
                     ORDER BY aw.rowid"
                ),
                params![webhook_id],
            )
            .await
            .map_err(query_err("get_active_agents_for_webhook"))?;
        collect_rows(rows, "get_active_agents_for_webhook", row_to_agent).await
    }

    // ── Leads & messages ────────────────────────────────────────────

    async fn insert_lead_with_messages(
        &self,
        lead: &Lead,
        messages: &[Message],
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let raw_data = to_json(&lead.raw_data, "leads.raw_data")?;
        let breakdown = to_json(&lead.score_breakdown, "leads.score_breakdown")?;

        let tx = self.begin("insert_lead_with_messages").await?;
        let result = async {
            tx.execute(
                &format!(
                    "INSERT INTO leads ({LEAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    lead.id.as_str(),
                    lead.user_id.as_str(),
                    lead.webhook_id.as_str(),
                    lead.webhook_name.as_str(),
                    lead.name.as_str(),
                    lead.email.as_str(),
                    opt_text(lead.phone.as_deref()),
                    opt_text(lead.company.as_deref()),
                    raw_data,
                    lead.score,
                    breakdown,
                    lead.status.as_str(),
                    fmt_datetime(&lead.created_at),
                    fmt_datetime(&lead.updated_at),
                ],
            )
            .await
            .map_err(query_err("insert_lead"))?;

            for message in messages {
                tx.execute(
                    &format!(
                        "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        message.id.as_str(),
                        message.lead_id.as_str(),
                        message.user_id.as_str(),
                        message.agent_id.as_str(),
                        message.subject.as_str(),
                        message.content.as_str(),
                        message.status.as_str(),
                        fmt_datetime(&message.created_at),
                        opt_datetime(message.sent_at.as_ref()),
                    ],
                )
                .await
                .map_err(query_err("insert_message"))?;
            }
            Ok::<_, DatabaseError>(())
        }
        .await;
        finish(tx, result, "insert_lead_with_messages").await?;

        debug!(
            lead_id = %lead.id,
            webhook_id = %lead.webhook_id,
            messages = messages.len(),
            "Lead persisted"
        );
        Ok(())
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err("get_lead"))?;
        first_row(rows, "get_lead", row_to_lead).await
    }

    async fn list_leads(&self, user_id: &str) -> Result<Vec<Lead>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEAD_COLUMNS} FROM leads WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("list_leads"))?;
        collect_rows(rows, "list_leads", row_to_lead).await
    }

    async fn update_lead_status(
        &self,
        id: &str,
        status: LeadStatus,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.lock.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), fmt_datetime(&Utc::now()), id],
            )
            .await
            .map_err(query_err("update_lead_status"))?;
        Ok(changed > 0)
    }

    async fn list_messages_for_lead(&self, lead_id: &str) -> Result<Vec<Message>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE lead_id = ?1 ORDER BY created_at, rowid"
                ),
                params![lead_id],
            )
            .await
            .map_err(query_err("list_messages_for_lead"))?;
        collect_rows(rows, "list_messages_for_lead", row_to_message).await
    }

    // ── Integrations ────────────────────────────────────────────────

    async fn insert_integration(&self, integration: &Integration) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO integrations ({INTEGRATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    integration.id.as_str(),
                    integration.user_id.as_str(),
                    integration.integration_type.as_str(),
                    integration.status.as_str(),
                    opt_text(integration.entity_id.as_deref()),
                    opt_text(integration.connection_id.as_deref()),
                    opt_text(integration.error_message.as_deref()),
                    opt_datetime(integration.last_sync_at.as_ref()),
                    fmt_datetime(&integration.created_at),
                    fmt_datetime(&integration.updated_at),
                ],
            )
            .await
            .map_err(query_err("insert_integration"))?;
        Ok(())
    }

    async fn get_integration(&self, id: &str) -> Result<Option<Integration>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err("get_integration"))?;
        first_row(rows, "get_integration", row_to_integration).await
    }

    async fn get_integration_by_type(
        &self,
        user_id: &str,
        integration_type: IntegrationType,
    ) -> Result<Option<Integration>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE user_id = ?1 AND integration_type = ?2"
                ),
                params![user_id, integration_type.as_str()],
            )
            .await
            .map_err(query_err("get_integration_by_type"))?;
        first_row(rows, "get_integration_by_type", row_to_integration).await
    }

    async fn get_integration_by_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<Option<Integration>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE user_id = ?1 AND connection_id = ?2"
                ),
                params![user_id, connection_id],
            )
            .await
            .map_err(query_err("get_integration_by_connection"))?;
        first_row(rows, "get_integration_by_connection", row_to_integration).await
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<Integration>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE user_id = ?1 ORDER BY created_at, rowid"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("list_integrations"))?;
        collect_rows(rows, "list_integrations", row_to_integration).await
    }

    async fn update_integration(&self, integration: &Integration) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let changed = self
            .conn()
            .execute(
                "UPDATE integrations SET status = ?1, entity_id = ?2, connection_id = ?3,
                 error_message = ?4, last_sync_at = ?5, updated_at = ?6 WHERE id = ?7",
                params![
                    integration.status.as_str(),
                    opt_text(integration.entity_id.as_deref()),
                    opt_text(integration.connection_id.as_deref()),
                    opt_text(integration.error_message.as_deref()),
                    opt_datetime(integration.last_sync_at.as_ref()),
                    fmt_datetime(&integration.updated_at),
                    integration.id.as_str(),
                ],
            )
            .await
            .map_err(query_err("update_integration"))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "integration".into(),
                id: integration.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agents::model::{AgentType, NewAgent};
    use crate::integrations::model::IntegrationStatus;
    use crate::leads::extract::extract_lead_fields;
    use crate::leads::model::{MessageStatus, ScoreFactor};
    use crate::webhooks::model::FormType;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn reads_wait_for_an_open_transaction() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();

        // Stand in for a write with its transaction still open.
        let guard = db.lock.lock().await;
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), db.get_webhook(&webhook.id))
                .await;
        assert!(blocked.is_err());

        drop(guard);
        assert!(db.get_webhook(&webhook.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("closelead.db");
        let webhook = make_webhook("u1", "Persisted");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_webhook(&webhook).await.unwrap();
        }

        assert!(path.exists());
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let loaded = db.get_webhook(&webhook.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Persisted");
    }

    fn make_webhook(user: &str, name: &str) -> Webhook {
        Webhook::new(
            user,
            name,
            FormType::Custom,
            "B2B SaaS buyers",
            None,
            "http://localhost:8080",
        )
    }

    fn make_agent(user: &str, name: &str) -> Agent {
        Agent::from_new(
            user,
            &NewAgent {
                name: name.into(),
                description: None,
                system_prompt: format!("{name} prompt"),
                agent_type: AgentType::ResponseAgent,
                webhook_ids: vec![],
                metadata: None,
                links: vec![],
            },
        )
    }

    fn make_lead(webhook: &Webhook, score: f64) -> Lead {
        let payload = json!({"name": "Jane Doe", "email": "jane@acme.com", "company": "Acme"});
        let breakdown = LeadScore {
            score,
            breakdown: vec![ScoreFactor {
                factor: "Company".into(),
                points: 3.0,
                reasoning: "Known brand".into(),
            }],
            summary: "Promising".into(),
        };
        Lead::new(webhook, extract_lead_fields(&payload), payload, breakdown)
    }

    fn make_message(lead: &Lead, agent_id: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            user_id: lead.user_id.clone(),
            agent_id: agent_id.into(),
            subject: "Follow-up".into(),
            content: "Hi".into(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    fn ids(webhooks: &[&Webhook]) -> Vec<String> {
        webhooks.iter().map(|w| w.id.clone()).collect()
    }

    // ── Users ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn user_onboarding_flag() {
        let db = test_db().await;
        assert!(!db.is_user_onboarded("u1").await.unwrap());
        db.mark_user_onboarded("u1").await.unwrap();
        db.mark_user_onboarded("u1").await.unwrap();
        assert!(db.is_user_onboarded("u1").await.unwrap());
        assert!(!db.is_user_onboarded("u2").await.unwrap());
    }

    // ── Webhooks ────────────────────────────────────────────────────

    #[tokio::test]
    async fn webhook_insert_and_get() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Contact form");
        db.insert_webhook(&webhook).await.unwrap();

        let fetched = db.get_webhook(&webhook.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Contact form");
        assert_eq!(fetched.webhook_secret, webhook.webhook_secret);
        assert_eq!(fetched.form_type, FormType::Custom);
        assert!(fetched.is_active);
        assert_eq!(fetched.webhook_url, webhook.webhook_url);
    }

    #[tokio::test]
    async fn webhook_get_missing_is_none() {
        let db = test_db().await;
        assert!(db.get_webhook("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_webhooks_scoped_to_owner_in_creation_order() {
        let db = test_db().await;
        let first = make_webhook("u1", "First");
        let second = make_webhook("u1", "Second");
        let other = make_webhook("u2", "Other");
        db.insert_webhook(&first).await.unwrap();
        db.insert_webhook(&second).await.unwrap();
        db.insert_webhook(&other).await.unwrap();

        let listed = db.list_webhooks("u1").await.unwrap();
        let names: Vec<_> = listed.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["First", "Second"]);
    }

    #[tokio::test]
    async fn update_webhook_persists_changes() {
        let db = test_db().await;
        let mut webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();

        webhook.is_active = false;
        webhook.webhook_secret = None;
        webhook.form_type = FormType::Typeform;
        db.update_webhook(&webhook).await.unwrap();

        let fetched = db.get_webhook(&webhook.id).await.unwrap().unwrap();
        assert!(!fetched.is_active);
        assert!(fetched.webhook_secret.is_none());
        assert_eq!(fetched.form_type, FormType::Typeform);
    }

    #[tokio::test]
    async fn update_missing_webhook_is_not_found() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Ghost");
        let err = db.update_webhook(&webhook).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_webhook_removes_associations() {
        let db = test_db().await;
        let keep = make_webhook("u1", "Keep");
        let gone = make_webhook("u1", "Gone");
        db.insert_webhook(&keep).await.unwrap();
        db.insert_webhook(&gone).await.unwrap();
        let agent = make_agent("u1", "Closer");
        db.insert_agent(&agent, &ids(&[&keep, &gone])).await.unwrap();

        assert!(db.delete_webhook(&gone.id).await.unwrap());
        assert!(!db.delete_webhook(&gone.id).await.unwrap());

        let linked = db.get_agent_webhooks(&agent.id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, keep.id);
        assert!(db.get_active_agents_for_webhook(&gone.id).await.unwrap().is_empty());
    }

    // ── Agents ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn agent_roundtrip_with_links() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();

        let mut agent = make_agent("u1", "Closer");
        agent.links = vec![AgentLink {
            name: "Calendar".into(),
            url: "https://cal.example.com".into(),
            description: Some("Book a call".into()),
        }];
        agent.metadata = Some("tier=gold".into());
        db.insert_agent(&agent, &ids(&[&webhook])).await.unwrap();

        let fetched = db.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.links, agent.links);
        assert_eq!(fetched.metadata.as_deref(), Some("tier=gold"));
        assert_eq!(fetched.agent_type, AgentType::ResponseAgent);

        let linked = db.get_agent_webhooks(&agent.id).await.unwrap();
        assert_eq!(linked[0].name, "Form");
    }

    #[tokio::test]
    async fn active_agents_follow_association_order_and_skip_inactive() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();

        let a = make_agent("u1", "A");
        let b = make_agent("u1", "B");
        let mut c = make_agent("u1", "C");
        c.is_active = false;
        for agent in [&a, &b, &c] {
            db.insert_agent(agent, &ids(&[&webhook])).await.unwrap();
        }

        let active = db.get_active_agents_for_webhook(&webhook.id).await.unwrap();
        let names: Vec<_> = active.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[tokio::test]
    async fn update_agent_replaces_association_set() {
        let db = test_db().await;
        let w1 = make_webhook("u1", "One");
        let w2 = make_webhook("u1", "Two");
        db.insert_webhook(&w1).await.unwrap();
        db.insert_webhook(&w2).await.unwrap();

        let mut agent = make_agent("u1", "Closer");
        db.insert_agent(&agent, &ids(&[&w1])).await.unwrap();

        agent.name = "Renamed".into();
        db.update_agent(&agent, Some(&ids(&[&w2]))).await.unwrap();

        let linked = db.get_agent_webhooks(&agent.id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, w2.id);
        assert_eq!(db.get_agent(&agent.id).await.unwrap().unwrap().name, "Renamed");

        // None leaves associations alone.
        db.update_agent(&agent, None).await.unwrap();
        assert_eq!(db.get_agent_webhooks(&agent.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_agent_cascades_join_rows() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();
        let agent = make_agent("u1", "Closer");
        db.insert_agent(&agent, &ids(&[&webhook])).await.unwrap();

        assert!(db.delete_agent(&agent.id).await.unwrap());
        assert!(db.get_agent(&agent.id).await.unwrap().is_none());
        assert!(db.get_agent_webhooks(&agent.id).await.unwrap().is_empty());
        assert!(!db.delete_agent(&agent.id).await.unwrap());
    }

    // ── Leads & messages ────────────────────────────────────────────

    #[tokio::test]
    async fn lead_with_messages_roundtrip() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();
        let lead = make_lead(&webhook, 8.0);
        let messages = vec![make_message(&lead, "a1"), make_message(&lead, "a2")];

        db.insert_lead_with_messages(&lead, &messages).await.unwrap();

        let fetched = db.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Jane Doe");
        assert_eq!(fetched.company.as_deref(), Some("Acme"));
        assert!(fetched.phone.is_none());
        assert_eq!(fetched.score, 8.0);
        assert_eq!(fetched.score_breakdown, lead.score_breakdown);
        assert_eq!(fetched.raw_data, lead.raw_data);
        assert_eq!(fetched.status, LeadStatus::New);
        assert_eq!(fetched.webhook_name, "Form");

        let stored = db.list_messages_for_lead(&lead.id).await.unwrap();
        let agents: Vec<_> = stored.iter().map(|m| m.agent_id.as_str()).collect();
        assert_eq!(agents, ["a1", "a2"]);
        assert!(stored.iter().all(|m| m.status == MessageStatus::Pending));
        assert!(stored.iter().all(|m| m.sent_at.is_none()));
    }

    #[tokio::test]
    async fn failed_message_insert_rolls_back_lead() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();
        let lead = make_lead(&webhook, 9.0);
        let first = make_message(&lead, "a1");
        let mut duplicate = make_message(&lead, "a2");
        duplicate.id = first.id.clone();

        let result = db.insert_lead_with_messages(&lead, &[first, duplicate]).await;
        assert!(result.is_err());
        assert!(db.get_lead(&lead.id).await.unwrap().is_none());
        assert!(db.list_messages_for_lead(&lead.id).await.unwrap().is_empty());

        // The connection is usable after the rollback.
        let retry = make_lead(&webhook, 9.0);
        db.insert_lead_with_messages(&retry, &[]).await.unwrap();
        assert!(db.get_lead(&retry.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_leads_newest_first() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();
        let older = make_lead(&webhook, 4.0);
        let newer = make_lead(&webhook, 7.0);
        db.insert_lead_with_messages(&older, &[]).await.unwrap();
        db.insert_lead_with_messages(&newer, &[]).await.unwrap();

        let leads = db.list_leads("u1").await.unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].id, newer.id);
        assert!(db.list_leads("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_lead_status() {
        let db = test_db().await;
        let webhook = make_webhook("u1", "Form");
        db.insert_webhook(&webhook).await.unwrap();
        let lead = make_lead(&webhook, 5.0);
        db.insert_lead_with_messages(&lead, &[]).await.unwrap();

        assert!(db.update_lead_status(&lead.id, LeadStatus::Contacted).await.unwrap());
        let fetched = db.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, LeadStatus::Contacted);
        assert!(!db.update_lead_status("missing", LeadStatus::Closed).await.unwrap());
    }

    // ── Integrations ────────────────────────────────────────────────

    #[tokio::test]
    async fn integration_lookup_by_type_and_connection() {
        let db = test_db().await;
        let mut integration = Integration::new("u1", IntegrationType::Gmail, "entity-1");
        db.insert_integration(&integration).await.unwrap();

        integration.mark_pending("conn-1");
        db.update_integration(&integration).await.unwrap();

        let by_type = db
            .get_integration_by_type("u1", IntegrationType::Gmail)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_type.id, integration.id);
        assert_eq!(by_type.status, IntegrationStatus::Pending);

        let by_conn = db
            .get_integration_by_connection("u1", "conn-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_conn.entity_id.as_deref(), Some("entity-1"));
        assert!(
            db.get_integration_by_connection("u2", "conn-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn integration_connected_keeps_sync_time() {
        let db = test_db().await;
        let mut integration = Integration::new("u1", IntegrationType::Gmail, "entity-1");
        db.insert_integration(&integration).await.unwrap();
        integration.mark_connected();
        db.update_integration(&integration).await.unwrap();

        let listed = db.list_integrations("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, IntegrationStatus::Connected);
        assert!(listed[0].last_sync_at.is_some());
        assert!(listed[0].error_message.is_none());
    }

    #[tokio::test]
    async fn one_integration_per_type_per_owner() {
        let db = test_db().await;
        let first = Integration::new("u1", IntegrationType::Gmail, "e1");
        let second = Integration::new("u1", IntegrationType::Gmail, "e2");
        db.insert_integration(&first).await.unwrap();
        assert!(db.insert_integration(&second).await.is_err());
    }
}
