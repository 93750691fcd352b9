use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use closelead::config::ServerConfig;
use closelead::integrations::{ComposioBroker, IntegrationService};
use closelead::leads::{LeadProcessor, LeadScorer};
use closelead::llm::create_provider;
use closelead::server::{AppState, build_router};
use closelead::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    // Dropping the guard flushes buffered file logs, so it lives until exit.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Closelead");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Scoring ──────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let processor = LeadProcessor::new(db.clone(), LeadScorer::new(llm));

    // ── Integrations ─────────────────────────────────────────────────────
    let integrations = match &config.broker {
        Some(broker_config) => {
            let broker = ComposioBroker::new(broker_config)
                .context("Failed to build connection broker client")?;
            info!(base_url = %broker_config.base_url, "Integrations enabled");
            Some(Arc::new(IntegrationService::new(db.clone(), Arc::new(broker))))
        }
        None => {
            warn!("COMPOSIO_API_KEY not set, integrations disabled");
            None
        }
    };

    let app = build_router(AppState {
        db,
        processor,
        integrations,
        app_url: config.app_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!(
        port = config.port,
        app_url = %config.app_url,
        model = %config.llm.model,
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down cleanly");
    Ok(())
}

/// Log to stderr, and additionally to a daily rolling file when a log
/// directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "closelead.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
