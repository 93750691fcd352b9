//! Bridges rig-core clients to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Output budget used when the request does not set one (Anthropic requires it).
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// A rig client for one of the supported backends.
pub enum RigClient {
    Anthropic(rig::client::Client<anthropic::client::AnthropicExt>),
    OpenAi(rig::client::Client<openai::client::OpenAIResponsesExt>),
}

impl RigClient {
    fn provider(&self) -> &'static str {
        match self {
            RigClient::Anthropic(_) => "anthropic",
            RigClient::OpenAi(_) => "openai",
        }
    }
}

/// `LlmProvider` backed by a rig agent built per request.
pub struct RigAdapter {
    client: RigClient,
    model: String,
}

impl RigAdapter {
    pub fn new(client: RigClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for RigAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_prompt();
        let prompt = request.user_prompt();
        let temperature = f64::from(request.temperature.unwrap_or(0.0));
        let max_tokens = u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));

        let result = match &self.client {
            RigClient::Anthropic(client) => {
                client
                    .agent(self.model.as_str())
                    .preamble(&preamble)
                    .temperature(temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt.as_str())
                    .await
            }
            RigClient::OpenAi(client) => {
                client
                    .agent(self.model.as_str())
                    .preamble(&preamble)
                    .temperature(temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt.as_str())
                    .await
            }
        };

        let content = result.map_err(|e| LlmError::RequestFailed {
            provider: self.client.provider().to_string(),
            reason: e.to_string(),
        })?;
        let content = require_content(self.client.provider(), content)?;

        tracing::debug!(
            model = %self.model,
            chars = content.len(),
            "LLM completion received"
        );
        Ok(CompletionResponse { content })
    }
}

/// A blank completion is a provider fault, not an answer to parse.
fn require_content(provider: &str, content: String) -> Result<String, LlmError> {
    if content.trim().is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "empty completion".to_string(),
        });
    }
    Ok(content)
}
