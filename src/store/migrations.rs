//! Schema versions for the libSQL store.
//!
//! `schema_versions` records every step that has been applied. Each pending
//! step runs in its own transaction together with its version row, so a
//! failed step leaves no partial schema behind.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append new steps at the end; never edit an applied one.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                onboarded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                webhook_url TEXT NOT NULL,
                webhook_secret TEXT,
                form_type TEXT NOT NULL,
                scoring_prompt TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_user ON webhooks(user_id);

            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                webhook_id TEXT NOT NULL,
                webhook_name TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                company TEXT,
                raw_data TEXT NOT NULL,
                score REAL NOT NULL,
                score_breakdown TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_user ON leads(user_id);
            CREATE INDEX IF NOT EXISTS idx_leads_webhook ON leads(webhook_id);

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                system_prompt TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                links TEXT NOT NULL DEFAULT '[]',
                metadata TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_user ON agents(user_id);

            CREATE TABLE IF NOT EXISTS agent_webhooks (
                agent_id TEXT NOT NULL,
                webhook_id TEXT NOT NULL,
                PRIMARY KEY (agent_id, webhook_id)
            );
            CREATE INDEX IF NOT EXISTS idx_agent_webhooks_webhook ON agent_webhooks(webhook_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                sent_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_lead ON messages(lead_id);
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);

            CREATE TABLE IF NOT EXISTS integrations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                integration_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'disconnected',
                entity_id TEXT,
                connection_id TEXT,
                error_message TEXT,
                last_sync_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, integration_type)
            );
            CREATE INDEX IF NOT EXISTS idx_integrations_connection ON integrations(connection_id);
        "#,
    },
];

fn migration_err(what: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Migration(format!("{what}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(migration_err("create schema_versions"))?;

    let applied = applied_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        let label = format!("V{} {}", step.version, step.name);
        tracing::info!(version = step.version, name = step.name, "Applying schema step");

        let tx = conn.transaction().await.map_err(migration_err(&label))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(migration_err(&label))?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(migration_err(&label))?;
        tx.commit().await.map_err(migration_err(&label))?;
    }

    let version = applied_version(conn).await?;
    tracing::info!(version, "Schema migrated");
    Ok(())
}

/// Highest applied version, 0 on a fresh database.
async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_versions", ())
        .await
        .map_err(migration_err("read schema version"))?;
    match rows.next().await.map_err(migration_err("read schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(migration_err("decode schema version")),
        None => Ok(0),
    }
}
