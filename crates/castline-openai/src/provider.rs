// OpenAI Provider Implementation
//
// Implements the LlmProvider trait from castline-core over the chat
// completions endpoint of any OpenAI-compatible server.

use async_trait::async_trait;
use castline_core::{
    CastlineError, LlmCallConfig, LlmCompletionMetadata, LlmMessage, LlmMessageRole, LlmProvider,
    LlmResponse, Result,
};
use reqwest::Client;
use tracing::debug;

use crate::types::{ChatRequest, OpenAiMessage, OpenAiResponse, ResponseFormat};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// DashScope's OpenAI-compatible endpoint, home of the qwen models
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Provider for OpenAI-compatible chat completion APIs
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Provider against the public OpenAI endpoint
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENAI_BASE_URL)
    }

    /// Provider against any compatible server, e.g. `https://host/v1`
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn convert_message(msg: &LlmMessage) -> OpenAiMessage {
        let role = match msg.role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
        };
        OpenAiMessage {
            role: role.to_string(),
            content: Some(msg.content.clone()),
        }
    }

    fn build_request(messages: &[LlmMessage], config: &LlmCallConfig) -> ChatRequest {
        ChatRequest {
            model: config.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            response_format: config.json_response.then(ResponseFormat::json_object),
            stream: false,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        let request = Self::build_request(&messages, config);

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CastlineError::llm(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CastlineError::llm(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let response_json: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CastlineError::llm(format!("Failed to parse response: {}", e)))?;

        let choice = response_json
            .choices
            .first()
            .ok_or_else(|| CastlineError::llm("No choices in response"))?;
        let text = choice.message.content.clone().unwrap_or_default();

        let metadata = LlmCompletionMetadata {
            total_tokens: response_json.usage.map(|u| u.total_tokens),
            prompt_tokens: response_json.usage.map(|u| u.prompt_tokens),
            completion_tokens: response_json.usage.map(|u| u.completion_tokens),
            model: response_json.model.clone(),
            finish_reason: choice.finish_reason.clone(),
        };
        debug!(
            model = %config.model,
            tokens = ?metadata.total_tokens,
            chars = text.chars().count(),
            "Chat completion finished"
        );

        Ok(LlmResponse { text, metadata })
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
