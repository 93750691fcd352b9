//! Configuration types.
//!
//! Everything is read from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default HTTP port.
const DEFAULT_PORT: u16 = 8080;

/// Default model for lead scoring.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default Composio API base URL.
pub const DEFAULT_BROKER_BASE_URL: &str = "https://backend.composio.dev/api/v1";

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Public base URL used to build webhook URLs and OAuth redirects.
    pub app_url: String,
    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    /// Connection broker settings, `None` disables integrations.
    pub broker: Option<BrokerConfig>,
}

/// Connection broker (Composio) configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub api_key: SecretString,
    pub base_url: String,
    /// Where the broker sends the user after the OAuth consent screen.
    pub redirect_url: String,
    pub timeout: Duration,
}

impl ServerConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match get("CLOSELEAD_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CLOSELEAD_PORT".into(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            None => DEFAULT_PORT,
        };

        let db_path = get("CLOSELEAD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/closelead.db"));

        let app_url = get("CLOSELEAD_APP_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let log_dir = get("CLOSELEAD_LOG_DIR").map(PathBuf::from);

        let backend = match get("CLOSELEAD_LLM_BACKEND") {
            Some(raw) => raw
                .parse::<LlmBackend>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "CLOSELEAD_LLM_BACKEND".into(),
                    message,
                })?,
            None => LlmBackend::OpenAi,
        };
        let key_var = backend.api_key_var();
        let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.into()))?;
        let model = get("CLOSELEAD_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let broker = get("COMPOSIO_API_KEY").map(|key| BrokerConfig {
            api_key: SecretString::from(key),
            base_url: get("COMPOSIO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BROKER_BASE_URL.to_string()),
            redirect_url: format!("{app_url}/integrations/callback"),
            timeout: Duration::from_secs(30),
        });

        Ok(Self {
            port,
            db_path,
            app_url,
            log_dir,
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            broker,
        })
    }
}
