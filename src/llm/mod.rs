//! Chat-completion access for lead scoring.
//!
//! The scorer only sees [`LlmProvider`]. Concrete clients come from rig-core
//! and are wrapped by [`RigAdapter`].

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::{RigAdapter, RigClient};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Which hosted model family scores leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "openai",
            LlmBackend::Anthropic => "anthropic",
        }
    }

    /// Environment variable holding this backend's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "anthropic" => Ok(LlmBackend::Anthropic),
            other => Err(format!(
                "unknown backend '{other}' (expected openai or anthropic)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

/// Build the scoring provider for the configured backend.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let key = config.api_key.expose_secret();
    let failed = |e: &dyn fmt::Display| LlmError::RequestFailed {
        provider: config.backend.to_string(),
        reason: format!("client construction failed: {e}"),
    };
    let client = match config.backend {
        LlmBackend::OpenAi => rig::providers::openai::Client::new(key)
            .map(RigClient::OpenAi)
            .map_err(|e| failed(&e))?,
        LlmBackend::Anthropic => rig::providers::anthropic::Client::new(key)
            .map(RigClient::Anthropic)
            .map_err(|e| failed(&e))?,
    };

    tracing::info!(backend = %config.backend, model = %config.model, "LLM provider ready");
    Ok(Arc::new(RigAdapter::new(client, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: LlmBackend, model: &str) -> LlmConfig {
        LlmConfig {
            backend,
            api_key: SecretString::from("placeholder"),
            model: model.to_string(),
        }
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<LlmBackend>(), Ok(LlmBackend::OpenAi));
        assert_eq!("anthropic".parse::<LlmBackend>(), Ok(LlmBackend::Anthropic));
        assert!("gemini".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn provider_reports_configured_model() {
        // Keys are not validated until the first request.
        let openai = create_provider(&config(LlmBackend::OpenAi, "gpt-4o-mini")).unwrap();
        assert_eq!(openai.model_name(), "gpt-4o-mini");

        let anthropic =
            create_provider(&config(LlmBackend::Anthropic, "claude-3-5-haiku-latest")).unwrap();
        assert_eq!(anthropic.model_name(), "claude-3-5-haiku-latest");
    }
}
